//! CLI tests: run the conductor binary against a temporary project root.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use conductor::core::notifications::InboxMessage;
use conductor::core::types::{Goal, GoalStatus};
use conductor::exit_codes;
use conductor::io::config::{ConductorConfig, write_config};
use conductor::io::goal_store::{FileGoalStore, GoalStore};
use conductor::io::inbox::post_message;
use conductor::io::init::{ConductorPaths, InitOptions, init_conductor};
use conductor::test_support::goal;

fn conductor(root: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_conductor"));
    cmd.arg("--root").arg(root);
    cmd
}

/// Initialize `root` with a session command run through `sh -c`.
fn setup(root: &Path, session_script: &str) -> ConductorPaths {
    let paths = init_conductor(root, &InitOptions { force: false }).expect("init");
    let cfg = ConductorConfig {
        wait_timeout_secs: 1,
        inbox_poll_interval_ms: 50,
        session: conductor::io::config::SessionConfig {
            command: vec!["sh".into(), "-c".into(), session_script.into()],
            timeout_secs: 30,
            output_limit_bytes: 10_000,
        },
        ..ConductorConfig::default()
    };
    write_config(&paths.config_path, &cfg).expect("write config");
    paths
}

fn satisfiable_goal(id: &str, world: &str) -> Goal {
    Goal {
        goal_state: Some(r#"{"shipped":true}"#.to_string()),
        world_state: Some(world.to_string()),
        ..goal(id, GoalStatus::Active)
    }
}

#[test]
fn commands_on_uninitialized_root_are_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = conductor(temp.path())
        .arg("status")
        .status()
        .expect("conductor status");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}

#[test]
fn init_then_status_lists_goals() {
    let temp = tempfile::tempdir().expect("tempdir");
    let init = conductor(temp.path())
        .arg("init")
        .status()
        .expect("conductor init");
    assert_eq!(init.code(), Some(exit_codes::OK));

    let paths = ConductorPaths::new(temp.path());
    FileGoalStore::new(&paths.goals_dir)
        .save(&goal("g1", GoalStatus::Paused))
        .expect("seed goal");

    let output = conductor(temp.path())
        .arg("status")
        .output()
        .expect("conductor status");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "g1\tpaused\t-\t0/0\tg1 name\n"
    );

    let again = conductor(temp.path())
        .arg("init")
        .status()
        .expect("second init");
    assert_eq!(again.code(), Some(exit_codes::ERROR));
}

#[test]
fn supervise_completes_satisfied_goal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = setup(temp.path(), "cat > /dev/null; echo ok");
    let store = FileGoalStore::new(&paths.goals_dir);
    store
        .save(&satisfiable_goal("g1", r#"{"shipped":true}"#))
        .expect("seed goal");

    let status = conductor(temp.path())
        .args(["supervise", "--goal", "g1", "--phase", "execute"])
        .status()
        .expect("conductor supervise");

    assert_eq!(status.code(), Some(exit_codes::COMPLETE));
    assert_eq!(store.get("g1").expect("get").status, GoalStatus::Completed);
    let transcript = fs::read_to_string(paths.transcript_path("g1")).expect("transcript");
    assert!(transcript.starts_with("## user\n\n"));
    assert!(transcript.contains("## assistant\n\nok\n"));
    assert!(paths.log_path("g1").exists());
}

#[test]
fn supervise_fails_when_initial_message_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = setup(temp.path(), "cat > /dev/null; exit 1");
    FileGoalStore::new(&paths.goals_dir)
        .save(&satisfiable_goal("g1", "{}"))
        .expect("seed goal");

    let status = conductor(temp.path())
        .args(["supervise", "--goal", "g1", "--phase", "execute"])
        .status()
        .expect("conductor supervise");

    assert_eq!(status.code(), Some(exit_codes::ERROR));
}

#[test]
fn inbox_message_drives_goal_to_completion() {
    let temp = tempfile::tempdir().expect("tempdir");
    let prepared = FileGoalStore::new(temp.path().join("prepared"));
    prepared
        .save(&satisfiable_goal("g1", r#"{"shipped":true}"#))
        .expect("prepared goal");

    let paths = ConductorPaths::new(temp.path());
    let script = format!(
        "if grep -q 'INCOMING AGENT MESSAGES'; then cp '{}' '{}'; fi; echo ok",
        temp.path().join("prepared").join("g1.json").display(),
        paths.goals_dir.join("g1.json").display(),
    );
    let paths = setup(temp.path(), &script);
    let store = FileGoalStore::new(&paths.goals_dir);
    store
        .save(&satisfiable_goal("g1", "{}"))
        .expect("seed goal");
    post_message(
        &paths.goal_inbox("g1"),
        &InboxMessage {
            from: "reviewer".to_string(),
            channel: None,
            body: "change merged".to_string(),
        },
    )
    .expect("post");

    let status = conductor(temp.path())
        .args(["supervise", "--goal", "g1", "--phase", "execute"])
        .status()
        .expect("conductor supervise");

    assert_eq!(status.code(), Some(exit_codes::COMPLETE));
    assert_eq!(store.get("g1").expect("get").status, GoalStatus::Completed);
    let transcript = fs::read_to_string(paths.transcript_path("g1")).expect("transcript");
    assert!(transcript.contains("change merged"));
}

#[test]
fn spawned_supervisor_runs_detached_and_watch_forgets_it() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = setup(temp.path(), "cat > /dev/null; echo ok");
    let store = FileGoalStore::new(&paths.goals_dir);
    store
        .save(&satisfiable_goal("g1", r#"{"shipped":true}"#))
        .expect("seed goal");

    let output = conductor(temp.path())
        .args(["spawn", "--goal", "g1"])
        .output()
        .expect("conductor spawn");
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let pid: i32 = String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse()
        .expect("pid");
    assert_eq!(store.get("g1").expect("get").supervisor_pid, pid);

    let deadline = Instant::now() + Duration::from_secs(20);
    while store.get("g1").expect("get").status != GoalStatus::Completed {
        assert!(Instant::now() < deadline, "supervisor did not complete goal");
        thread::sleep(Duration::from_millis(50));
    }

    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let watch = conductor(temp.path())
            .args(["watch", "--once"])
            .status()
            .expect("conductor watch");
        assert_eq!(watch.code(), Some(exit_codes::OK));
        if store.get("g1").expect("get").supervisor_pid == 0 {
            break;
        }
        assert!(Instant::now() < deadline, "supervisor pid was never cleared");
        thread::sleep(Duration::from_millis(100));
    }
    assert_eq!(store.get("g1").expect("get").status, GoalStatus::Completed);
}

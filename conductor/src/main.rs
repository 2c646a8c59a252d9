//! `conductor` command-line interface.
//!
//! The same binary is both the control surface (`init`, `status`, `spawn`,
//! `kill`, `watch`) and the supervisor process the orchestrator re-executes
//! (`supervise`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::{error, info};

use conductor::core::types::SupervisorPhase;
use conductor::exit_codes;
use conductor::io::action_store::FileActionStore;
use conductor::io::config::{ConductorConfig, load_config};
use conductor::io::goal_store::FileGoalStore;
use conductor::io::inbox::{InboxChannel, NotificationChannel};
use conductor::io::init::{ConductorPaths, InitOptions, init_conductor};
use conductor::io::proc_table::OsProcessTable;
use conductor::io::reactor::Doorbell;
use conductor::io::session::{CommandSession, CommandSessionConfig};
use conductor::io::signals::{self, ShutdownToken};
use conductor::io::work_queue::FileWorkQueue;
use conductor::io::workers::{ApprovalPolicy, DenyAll, EmptyWorkerPool, UnattendedApproval};
use conductor::logging;
use conductor::orchestrator::{Orchestrator, OrchestratorConfig};
use conductor::status::{collect_status, render_status};
use conductor::supervisor::{Supervisor, SupervisorSettings};
use conductor::watch::run_watch;

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Spawn, watch, and run per-goal supervisor processes"
)]
struct Cli {
    /// Project root containing `.conductor/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.conductor/` and a default config.
    Init {
        /// Overwrite the existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// List goals with their supervisor and progress.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Start a supervisor for a goal.
    Spawn {
        #[arg(long)]
        goal: String,
    },
    /// Stop a goal's supervisor and pause the goal.
    Kill {
        #[arg(long)]
        goal: String,
    },
    /// Keep every planning/active goal supervised until interrupted.
    Watch {
        /// Run a single reconciliation pass.
        #[arg(long)]
        once: bool,
    },
    /// Run the supervisor loop for one goal (spawned by the orchestrator).
    Supervise {
        #[arg(long)]
        goal: String,
        #[arg(long, value_enum)]
        phase: SupervisorPhase,
        /// Approve worker requests without asking.
        #[arg(long)]
        yolo: bool,
    },
}

/// Missing layout or invalid configuration.
#[derive(Debug, Error)]
#[error("{0:#}")]
struct InvalidSetup(anyhow::Error);

fn main() {
    let cli = Cli::parse();
    if !matches!(cli.command, Command::Supervise { .. }) {
        logging::init();
    }
    let code = match run(&cli.root, cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            if err.downcast_ref::<InvalidSetup>().is_some() {
                exit_codes::INVALID
            } else {
                exit_codes::ERROR
            }
        }
    };
    std::process::exit(code);
}

fn run(root: &Path, command: Command) -> Result<i32> {
    match command {
        Command::Init { force } => cmd_init(root, force),
        Command::Status { json } => cmd_status(root, json),
        Command::Spawn { goal } => cmd_spawn(root, &goal),
        Command::Kill { goal } => cmd_kill(root, &goal),
        Command::Watch { once } => cmd_watch(root, once),
        Command::Supervise { goal, phase, yolo } => cmd_supervise(root, &goal, phase, yolo),
    }
}

/// Resolve paths and load config for an initialized root.
fn load_setup(root: &Path) -> Result<(ConductorPaths, ConductorConfig)> {
    let paths = ConductorPaths::new(root);
    paths.ensure_initialized().map_err(InvalidSetup)?;
    let cfg = load_config(&paths.config_path).map_err(InvalidSetup)?;
    Ok((paths, cfg))
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_conductor(root, &InitOptions { force })?;
    println!("initialized {}", paths.conductor_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_status(root: &Path, json: bool) -> Result<i32> {
    let (paths, _) = load_setup(root)?;
    let store = FileGoalStore::new(&paths.goals_dir);
    let reports = collect_status(&store, &OsProcessTable)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("serialize status")?
        );
    } else {
        print!("{}", render_status(&reports));
    }
    Ok(exit_codes::OK)
}

fn cmd_spawn(root: &Path, goal_id: &str) -> Result<i32> {
    let (paths, cfg) = load_setup(root)?;
    let store = FileGoalStore::new(&paths.goals_dir);
    let processes = OsProcessTable;
    let orchestrator = Orchestrator::new(
        &store,
        &processes,
        OrchestratorConfig::from_config(&cfg, &paths.root),
    );
    let pid = orchestrator.spawn_supervisor(goal_id)?;
    println!("{pid}");
    Ok(exit_codes::OK)
}

fn cmd_kill(root: &Path, goal_id: &str) -> Result<i32> {
    let (paths, cfg) = load_setup(root)?;
    let store = FileGoalStore::new(&paths.goals_dir);
    let processes = OsProcessTable;
    let orchestrator = Orchestrator::new(
        &store,
        &processes,
        OrchestratorConfig::from_config(&cfg, &paths.root),
    );
    orchestrator.kill_supervisor(goal_id)?;
    Ok(exit_codes::OK)
}

fn cmd_watch(root: &Path, once: bool) -> Result<i32> {
    let (paths, cfg) = load_setup(root)?;
    let doorbell = Doorbell::new();
    let shutdown = ShutdownToken::new();
    signals::install(&shutdown, &doorbell)?;

    let store = FileGoalStore::new(&paths.goals_dir);
    let processes = OsProcessTable;
    let orchestrator = Orchestrator::new(
        &store,
        &processes,
        OrchestratorConfig::from_config(&cfg, &paths.root),
    );
    let summary = run_watch(
        &orchestrator,
        cfg.watch_interval(),
        &doorbell,
        &shutdown,
        once,
    )?;
    if once {
        println!(
            "reaped {} stale {} respawned {}",
            summary.reaped, summary.stale, summary.respawned
        );
    }
    Ok(exit_codes::OK)
}

/// Entry point of a spawned supervisor. Its standard streams are usually
/// discarded, so everything after logging setup goes to the goal's log file
/// and failures are reported through the exit code.
fn cmd_supervise(root: &Path, goal_id: &str, phase: SupervisorPhase, yolo: bool) -> Result<i32> {
    let (paths, cfg) = load_setup(root)?;
    if let Err(err) = logging::init_to_file(&paths.log_path(goal_id)) {
        eprintln!("{err:#}");
    }

    // Before any other thread exists, so every thread inherits the mask.
    let doorbell = Doorbell::new();
    let shutdown = ShutdownToken::new();
    if let Err(err) = signals::install(&shutdown, &doorbell) {
        error!(err = %format!("{err:#}"), "install signal handling");
        return Ok(exit_codes::ERROR);
    }

    let goals = FileGoalStore::new(&paths.goals_dir);
    let actions = FileActionStore::new(&paths.actions_dir);
    let queue = FileWorkQueue::new(&paths.queues_dir);
    let mut session = match CommandSession::new(CommandSessionConfig {
        command: cfg.session.command.clone(),
        workdir: paths.root.clone(),
        timeout: std::time::Duration::from_secs(cfg.session.timeout_secs),
        output_limit_bytes: cfg.session.output_limit_bytes,
        transcript_path: paths.transcript_path(goal_id),
    }) {
        Ok(session) => session,
        Err(err) => {
            error!(err = %format!("{err:#}"), "create session");
            return Ok(exit_codes::ERROR);
        }
    };
    let mut inbox = match InboxChannel::open(
        paths.goal_inbox(goal_id),
        &doorbell,
        cfg.inbox_poll_interval(),
    ) {
        Ok(inbox) => Some(inbox),
        Err(err) => {
            error!(err = %format!("{err:#}"), "inbox unavailable, running without notifications");
            None
        }
    };
    let mut workers = EmptyWorkerPool;
    let policy: &dyn ApprovalPolicy = if yolo { &UnattendedApproval } else { &DenyAll };

    let exit = Supervisor {
        goals: &goals,
        actions: &actions,
        queue: &queue,
        session: &mut session,
        notifications: inbox
            .as_mut()
            .map(|inbox| inbox as &mut dyn NotificationChannel),
        workers: &mut workers,
        policy,
        doorbell: &doorbell,
        shutdown: &shutdown,
        settings: SupervisorSettings {
            phase,
            wait_timeout: cfg.wait_timeout(),
            max_consecutive_failures: cfg.max_consecutive_failures,
        },
    }
    .run(goal_id);

    info!(goal_id, ?exit, "supervisor exiting");
    Ok(exit.exit_code())
}

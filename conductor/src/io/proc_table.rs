//! The OS process table as seen by the orchestrator.
//!
//! [`ProcessTable`] is the liveness/spawn/signal capability the orchestrator
//! depends on. Tests substitute a scripted table; [`OsProcessTable`] talks to
//! the real kernel.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use std::os::unix::process::CommandExt;
use tracing::{debug, error, instrument};

use super::os::{self, WaitStatus};

pub use super::os::Delivery;

/// How long to poll a non-child pid for disappearance after a forced kill.
const NON_CHILD_EXIT_TIMEOUT: Duration = Duration::from_secs(5);
const NON_CHILD_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A detached child to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workdir: PathBuf,
}

/// Result of a non-blocking reap attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    StillRunning,
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// Not our child (or already reaped); liveness must be probed instead.
    NotAChild,
}

pub trait ProcessTable {
    /// Start `request` detached from our stdio and process group. Returns the pid.
    fn spawn_detached(&self, request: &SpawnRequest) -> Result<i32>;
    /// Zero-signal probe.
    fn is_alive(&self, pid: i32) -> bool;
    fn try_reap(&self, pid: i32) -> Result<ReapOutcome>;
    /// Reap every child that has exited, recorded or not. Returns their pids.
    fn reap_exited(&self) -> Result<Vec<i32>>;
    fn terminate(&self, pid: i32) -> Result<Delivery>;
    fn force_kill(&self, pid: i32) -> Result<Delivery>;
    /// Block until `pid` has exited, reaping it when it is our child.
    fn wait_exit(&self, pid: i32) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessTable;

impl ProcessTable for OsProcessTable {
    #[instrument(skip_all, fields(program = %request.program.display()))]
    fn spawn_detached(&self, request: &SpawnRequest) -> Result<i32> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .current_dir(&request.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);
        os::reset_signal_mask(&mut cmd);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                error!(err = %err, "failed to spawn detached process");
                return Err(err).with_context(|| format!("spawn {}", request.program.display()));
            }
        };
        let pid = i32::try_from(child.id()).context("child pid out of range")?;
        // Dropping the handle neither kills nor waits; reaping happens via
        // `try_reap` / `wait_exit` on the pid.
        drop(child);
        debug!(pid, "spawned detached process");
        Ok(pid)
    }

    fn is_alive(&self, pid: i32) -> bool {
        os::process_exists(pid)
    }

    fn try_reap(&self, pid: i32) -> Result<ReapOutcome> {
        let status = os::try_wait(pid).with_context(|| format!("waitpid {pid}"))?;
        Ok(match status {
            WaitStatus::Running => ReapOutcome::StillRunning,
            WaitStatus::Exited(code) => ReapOutcome::Exited {
                code: Some(code),
                signal: None,
            },
            WaitStatus::Signaled(signal) => ReapOutcome::Exited {
                code: None,
                signal: Some(signal),
            },
            WaitStatus::NotChild => ReapOutcome::NotAChild,
        })
    }

    fn reap_exited(&self) -> Result<Vec<i32>> {
        os::reap_any_exited().context("reap exited children")
    }

    fn terminate(&self, pid: i32) -> Result<Delivery> {
        os::terminate(pid).with_context(|| format!("SIGTERM {pid}"))
    }

    fn force_kill(&self, pid: i32) -> Result<Delivery> {
        os::force_kill(pid).with_context(|| format!("SIGKILL {pid}"))
    }

    fn wait_exit(&self, pid: i32) -> Result<()> {
        match os::wait_blocking(pid).with_context(|| format!("waitpid {pid}"))? {
            WaitStatus::NotChild => {}
            _ => return Ok(()),
        }
        let deadline = Instant::now() + NON_CHILD_EXIT_TIMEOUT;
        while os::process_exists(pid) {
            if Instant::now() >= deadline {
                return Err(anyhow!("process {pid} still present after kill"));
            }
            thread::sleep(NON_CHILD_POLL_INTERVAL);
        }
        Ok(())
    }
}

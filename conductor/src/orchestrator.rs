//! Lifecycle of per-goal supervisor processes.
//!
//! The orchestrator reconciles what the goal store believes ("goal g has a
//! supervisor with pid p") against the OS process table. Every observation of
//! a dead recorded pid clears it, so the belief converges without a separate
//! cleanup step. Batch operations handle goals independently: one goal's
//! failure is logged and the sweep continues.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::health::{SupervisorHealth, assess};
use crate::core::types::{Goal, GoalStatus, SupervisorPhase};
use crate::io::config::ConductorConfig;
use crate::io::goal_store::{GoalStore, is_goal_not_found};
use crate::io::proc_table::{Delivery, ProcessTable, ReapOutcome, SpawnRequest};

/// Orchestrator conditions callers branch on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("goal {0} has no supervisor")]
    NoSupervisor(String),

    #[error("goal {goal_id} already has a running supervisor (pid {pid})")]
    AlreadySupervised { goal_id: String, pid: i32 },
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Supervisors recorded longer ago than this are forgotten by `check_stale`.
    pub stale_after: Duration,
    /// Delay between SIGTERM and SIGKILL in `kill_supervisor`.
    pub kill_grace: Duration,
    /// Program to re-exec as a supervisor. `None` resolves the running binary.
    pub executable: Option<PathBuf>,
    /// Working directory of spawned supervisors (the project root).
    pub workdir: PathBuf,
}

impl OrchestratorConfig {
    pub fn from_config(cfg: &ConductorConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            stale_after: cfg.stale_after(),
            kill_grace: cfg.kill_grace(),
            executable: None,
            workdir: workdir.into(),
        }
    }
}

/// Arguments that turn the conductor binary into a supervisor for one goal.
pub fn supervise_args(goal_id: &str, phase: SupervisorPhase) -> Vec<String> {
    vec![
        "supervise".to_string(),
        "--goal".to_string(),
        goal_id.to_string(),
        "--phase".to_string(),
        phase.as_str().to_string(),
        "--yolo".to_string(),
    ]
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct Orchestrator<'a> {
    store: &'a dyn GoalStore,
    processes: &'a dyn ProcessTable,
    config: OrchestratorConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a dyn GoalStore,
        processes: &'a dyn ProcessTable,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            processes,
            config,
        }
    }

    /// Start a supervisor for `goal_id` and record it.
    ///
    /// Rejects a goal whose recorded supervisor is still alive. If recording
    /// the new pid fails, the child is killed and reaped before returning
    /// the error so no unrecorded supervisor survives.
    #[instrument(skip(self))]
    pub fn spawn_supervisor(&self, goal_id: &str) -> Result<i32> {
        let goal = self.store.get(goal_id)?;
        if goal.has_supervisor() && self.processes.is_alive(goal.supervisor_pid) {
            return Err(OrchestratorError::AlreadySupervised {
                goal_id: goal_id.to_string(),
                pid: goal.supervisor_pid,
            }
            .into());
        }

        let phase = SupervisorPhase::for_status(goal.status);
        let program = match &self.config.executable {
            Some(path) => path.clone(),
            None => std::env::current_exe().context("resolve conductor executable")?,
        };
        let request = SpawnRequest {
            program,
            args: supervise_args(goal_id, phase),
            workdir: self.config.workdir.clone(),
        };
        let pid = self
            .processes
            .spawn_detached(&request)
            .with_context(|| format!("spawn supervisor for goal {goal_id}"))?;

        if let Err(err) = self.store.update_supervisor(goal_id, pid, now_ms()) {
            warn!(goal_id, pid, err = %format!("{err:#}"), "recording supervisor failed, rolling back");
            self.rollback_spawn(pid);
            return Err(err.context(format!("record supervisor for goal {goal_id}")));
        }

        info!(goal_id, pid, %phase, "supervisor spawned");
        Ok(pid)
    }

    fn rollback_spawn(&self, pid: i32) {
        if let Err(err) = self.processes.force_kill(pid) {
            warn!(pid, err = %format!("{err:#}"), "rollback kill failed");
        }
        if let Err(err) = self.processes.wait_exit(pid) {
            warn!(pid, err = %format!("{err:#}"), "rollback reap failed");
        }
    }

    /// Whether `goal_id` has a live supervisor. Clears a recorded pid whose
    /// process is gone.
    pub fn supervisor_alive(&self, goal_id: &str) -> bool {
        let goal = match self.store.get(goal_id) {
            Ok(goal) => goal,
            Err(err) => {
                if !is_goal_not_found(&err) {
                    warn!(goal_id, err = %format!("{err:#}"), "load goal for liveness check");
                }
                return false;
            }
        };
        match self.probe_and_heal(&goal, None, now_ms()) {
            Ok(health) => matches!(
                health,
                SupervisorHealth::Running | SupervisorHealth::Stale { .. }
            ),
            Err(err) => {
                warn!(goal_id, err = %format!("{err:#}"), "clear dead supervisor");
                false
            }
        }
    }

    /// Probe the recorded supervisor of `goal` and clear the record when the
    /// process is gone, or (with `stale_after`) has outlived the threshold.
    ///
    /// Idempotent: a cleared record is `Absent` on the next call.
    fn probe_and_heal(
        &self,
        goal: &Goal,
        stale_after: Option<Duration>,
        now: i64,
    ) -> Result<SupervisorHealth> {
        let health = assess(
            goal,
            |pid| self.processes.is_alive(pid),
            now,
            stale_after.unwrap_or(Duration::MAX),
        );
        if health.needs_clearing() {
            self.store
                .update_supervisor(&goal.id, 0, 0)
                .with_context(|| format!("clear supervisor of goal {}", goal.id))?;
            match health {
                SupervisorHealth::Stale { age_ms } => {
                    info!(goal_id = %goal.id, pid = goal.supervisor_pid, age_ms, "cleared stale supervisor");
                }
                _ => info!(goal_id = %goal.id, pid = goal.supervisor_pid, "cleared dead supervisor"),
            }
        }
        Ok(health)
    }

    /// Reap every recorded supervisor that has exited and clear its record,
    /// then reap exited children no goal records any more. Returns how many
    /// records were cleared.
    pub fn reap_supervisors(&self) -> Result<usize> {
        let goals = self.store.list_all().context("list goals for reaping")?;
        let now = now_ms();
        let mut cleared = 0;
        for goal in goals.iter().filter(|goal| goal.has_supervisor()) {
            match self.reap_one(goal, now) {
                Ok(true) => cleared += 1,
                Ok(false) => {}
                Err(err) => warn!(goal_id = %goal.id, err = %format!("{err:#}"), "reap failed"),
            }
        }
        // Children whose record is already gone (stale, killed elsewhere)
        // would otherwise stay zombies.
        match self.processes.reap_exited() {
            Ok(pids) if !pids.is_empty() => info!(?pids, "reaped untracked children"),
            Ok(_) => {}
            Err(err) => warn!(err = %format!("{err:#}"), "sweep of exited children failed"),
        }
        debug!(cleared, "reap pass finished");
        Ok(cleared)
    }

    fn reap_one(&self, goal: &Goal, now: i64) -> Result<bool> {
        let pid = goal.supervisor_pid;
        match self.processes.try_reap(pid)? {
            ReapOutcome::StillRunning => Ok(false),
            ReapOutcome::Exited { code, signal } => {
                info!(goal_id = %goal.id, pid, code, signal, "supervisor exited");
                self.store
                    .update_supervisor(&goal.id, 0, 0)
                    .with_context(|| format!("clear supervisor of goal {}", goal.id))?;
                Ok(true)
            }
            ReapOutcome::NotAChild => {
                let health = self.probe_and_heal(goal, None, now)?;
                Ok(health.needs_clearing())
            }
        }
    }

    /// Stop the supervisor of `goal_id` and pause the goal.
    ///
    /// Sends SIGTERM, waits the grace period, then SIGKILL and blocks until
    /// the process is gone. A process that is already gone counts as killed.
    /// Fails only when the goal is missing or has no recorded supervisor.
    #[instrument(skip(self))]
    pub fn kill_supervisor(&self, goal_id: &str) -> Result<()> {
        let goal = self.store.get(goal_id)?;
        if !goal.has_supervisor() {
            return Err(OrchestratorError::NoSupervisor(goal_id.to_string()).into());
        }
        let pid = goal.supervisor_pid;

        match self.processes.terminate(pid) {
            Ok(Delivery::Delivered) => {
                thread::sleep(self.config.kill_grace);
                if self.exited_after_grace(pid) {
                    info!(goal_id, pid, "supervisor stopped");
                } else {
                    if let Err(err) = self.processes.force_kill(pid) {
                        warn!(pid, err = %format!("{err:#}"), "SIGKILL failed");
                    }
                    if let Err(err) = self.processes.wait_exit(pid) {
                        warn!(pid, err = %format!("{err:#}"), "wait for supervisor exit");
                    }
                    info!(goal_id, pid, "supervisor killed");
                }
            }
            Ok(Delivery::NoSuchProcess) => info!(goal_id, pid, "supervisor already gone"),
            Err(err) => warn!(pid, err = %format!("{err:#}"), "SIGTERM failed"),
        }

        self.store.update_supervisor(goal_id, 0, 0)?;
        self.store.update_status(goal_id, GoalStatus::Paused)?;
        Ok(())
    }

    /// Whether `pid` is gone after SIGTERM. Reaps it when it is our child.
    fn exited_after_grace(&self, pid: i32) -> bool {
        match self.processes.try_reap(pid) {
            Ok(ReapOutcome::Exited { .. }) => true,
            Ok(ReapOutcome::StillRunning) => false,
            Ok(ReapOutcome::NotAChild) => !self.processes.is_alive(pid),
            Err(err) => {
                warn!(pid, err = %format!("{err:#}"), "check supervisor after SIGTERM");
                false
            }
        }
    }

    /// Forget supervisors that are dead or older than the staleness
    /// threshold. Never signals a process. Returns how many were cleared.
    pub fn check_stale(&self) -> Result<usize> {
        self.check_stale_at(now_ms())
    }

    pub fn check_stale_at(&self, now: i64) -> Result<usize> {
        let goals = self.store.list_all().context("list goals for staleness check")?;
        let mut cleared = 0;
        for goal in goals.iter().filter(|goal| goal.has_supervisor()) {
            match self.probe_and_heal(goal, Some(self.config.stale_after), now) {
                Ok(health) if health.needs_clearing() => cleared += 1,
                Ok(_) => {}
                Err(err) => {
                    warn!(goal_id = %goal.id, err = %format!("{err:#}"), "stale check failed");
                }
            }
        }
        debug!(cleared, "stale check finished");
        Ok(cleared)
    }

    /// Spawn a supervisor for every planning or active goal that has none
    /// recorded. Returns how many were spawned.
    pub fn respawn_dead(&self) -> Result<usize> {
        let mut spawned = 0;
        for status in GoalStatus::ALL
            .into_iter()
            .filter(GoalStatus::wants_supervisor)
        {
            let goals = self
                .store
                .list_by_status(status)
                .with_context(|| format!("list {status} goals"))?;
            for goal in goals.iter().filter(|goal| !goal.has_supervisor()) {
                match self.spawn_supervisor(&goal.id) {
                    Ok(_) => spawned += 1,
                    Err(err) => {
                        warn!(goal_id = %goal.id, err = %format!("{err:#}"), "respawn failed");
                    }
                }
            }
        }
        debug!(spawned, "respawn pass finished");
        Ok(spawned)
    }
}

//! The watchdog: periodic reconciliation of goals against supervisors.

use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::io::reactor::{Doorbell, Interest};
use crate::io::signals::ShutdownToken;
use crate::orchestrator::Orchestrator;

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub reaped: usize,
    pub stale: usize,
    pub respawned: usize,
}

/// Reap exited supervisors, forget stale ones, then respawn what is missing.
pub fn watch_pass(orchestrator: &Orchestrator<'_>) -> Result<PassSummary> {
    let reaped = orchestrator.reap_supervisors()?;
    let stale = orchestrator.check_stale()?;
    let respawned = orchestrator.respawn_dead()?;
    let summary = PassSummary {
        reaped,
        stale,
        respawned,
    };
    info!(reaped, stale, respawned, "watch pass finished");
    Ok(summary)
}

/// Run passes every `interval` until `shutdown` is cancelled. With `once`,
/// run a single pass and return its result.
///
/// A stale check runs first so supervisors recorded before a crash of the
/// watchdog itself are forgotten before anything is respawned.
pub fn run_watch(
    orchestrator: &Orchestrator<'_>,
    interval: Duration,
    doorbell: &Doorbell,
    shutdown: &ShutdownToken,
    once: bool,
) -> Result<PassSummary> {
    let cleared = orchestrator.check_stale()?;
    if cleared > 0 {
        info!(cleared, "cleared stale supervisors at startup");
    }

    let mut last = PassSummary::default();
    loop {
        if shutdown.is_cancelled() {
            info!("watch stopping");
            return Ok(last);
        }
        match watch_pass(orchestrator) {
            Ok(summary) => last = summary,
            Err(err) if once => return Err(err),
            Err(err) => warn!(err = %format!("{err:#}"), "watch pass failed"),
        }
        if once {
            return Ok(last);
        }
        doorbell.wait::<()>(&Interest::new(), interval);
    }
}

//! Classification of a goal's recorded supervisor.

use std::time::Duration;

use crate::core::types::Goal;

/// What the store's belief about a supervisor amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorHealth {
    /// No supervisor is recorded.
    Absent,
    /// The recorded process exists and is within the staleness window.
    Running,
    /// The recorded process no longer exists.
    Dead,
    /// The recorded process exists but has run longer than the staleness
    /// threshold; treated as hung.
    Stale { age_ms: i64 },
}

impl SupervisorHealth {
    /// Whether the recorded pid should be cleared from the store.
    pub fn needs_clearing(&self) -> bool {
        matches!(self, SupervisorHealth::Dead | SupervisorHealth::Stale { .. })
    }
}

/// Assess the recorded supervisor of `goal`.
///
/// `is_alive` is only consulted when a pid is recorded.
pub fn assess<F: FnOnce(i32) -> bool>(
    goal: &Goal,
    is_alive: F,
    now_ms: i64,
    stale_after: Duration,
) -> SupervisorHealth {
    if !goal.has_supervisor() {
        return SupervisorHealth::Absent;
    }
    if !is_alive(goal.supervisor_pid) {
        return SupervisorHealth::Dead;
    }
    let age_ms = now_ms.saturating_sub(goal.supervisor_started_at);
    let limit_ms = i64::try_from(stale_after.as_millis()).unwrap_or(i64::MAX);
    if age_ms > limit_ms {
        SupervisorHealth::Stale { age_ms }
    } else {
        SupervisorHealth::Running
    }
}

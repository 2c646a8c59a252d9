//! Resolution of actions left `Running` by a supervisor that is gone.

use crate::core::types::{ActionStatus, WorkItem, WorkItemStatus};

/// What to do with a running action once its work item has been looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrphanResolution {
    /// Work was lost or never claimed; retry it.
    Requeue,
    /// The worker finished while nobody was watching.
    Complete { result: Option<String> },
    /// The worker failed while nobody was watching.
    Fail { error: Option<String> },
    /// A worker still holds the item; do not disturb it.
    LeaveRunning,
}

impl OrphanResolution {
    /// Action status after applying this resolution.
    pub fn status(&self) -> ActionStatus {
        match self {
            OrphanResolution::Requeue => ActionStatus::Pending,
            OrphanResolution::Complete { .. } => ActionStatus::Completed,
            OrphanResolution::Fail { .. } => ActionStatus::Failed,
            OrphanResolution::LeaveRunning => ActionStatus::Running,
        }
    }

    /// Result text to persist alongside the new status.
    pub fn result(&self) -> Option<&str> {
        match self {
            OrphanResolution::Complete { result } => result.as_deref(),
            OrphanResolution::Fail { error } => error.as_deref(),
            OrphanResolution::Requeue | OrphanResolution::LeaveRunning => None,
        }
    }

    pub fn changes_action(&self) -> bool {
        *self != OrphanResolution::LeaveRunning
    }
}

/// Decide the fate of a running action from its backing work item.
///
/// `None` covers both "no work item recorded" and "work item no longer exists".
pub fn resolve_orphan(item: Option<&WorkItem>) -> OrphanResolution {
    let Some(item) = item else {
        return OrphanResolution::Requeue;
    };
    match item.status {
        WorkItemStatus::Completed => OrphanResolution::Complete {
            result: item.result.clone(),
        },
        WorkItemStatus::Failed => OrphanResolution::Fail {
            error: item.error.clone(),
        },
        WorkItemStatus::Assigned => OrphanResolution::LeaveRunning,
        WorkItemStatus::Queued => OrphanResolution::Requeue,
    }
}

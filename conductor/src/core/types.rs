//! Shared deterministic types for goal supervision.
//!
//! Goals, actions, and work items are owned by external stores. The core only
//! reads them and moves the few fields it is responsible for: goal status,
//! the recorded supervisor process, and action status/result.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a goal: `Planning -> Active -> (Paused) -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    Planning,
    Active,
    Paused,
    Completed,
}

impl GoalStatus {
    pub const ALL: [GoalStatus; 4] = [
        GoalStatus::Planning,
        GoalStatus::Active,
        GoalStatus::Paused,
        GoalStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GoalStatus::Planning => "planning",
            GoalStatus::Active => "active",
            GoalStatus::Paused => "paused",
            GoalStatus::Completed => "completed",
        }
    }

    /// Statuses whose goals should always have a supervisor running.
    pub fn wants_supervisor(&self) -> bool {
        matches!(self, GoalStatus::Planning | GoalStatus::Active)
    }
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Running => "running",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
            ActionStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a unit of remote work, as reported by the work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemStatus {
    Queued,
    Assigned,
    Completed,
    Failed,
}

/// Which half of the goal lifecycle a supervisor is started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorPhase {
    Plan,
    Execute,
}

impl SupervisorPhase {
    /// `plan` while the goal is still being planned, `execute` otherwise.
    pub fn for_status(status: GoalStatus) -> Self {
        if status == GoalStatus::Planning {
            SupervisorPhase::Plan
        } else {
            SupervisorPhase::Execute
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SupervisorPhase::Plan => "plan",
            SupervisorPhase::Execute => "execute",
        }
    }
}

impl fmt::Display for SupervisorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work with a target world state.
///
/// `goal_state` and `world_state` are kept as raw JSON text: a malformed
/// document is meaningful input to the evaluator, not a load error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub goal_state: Option<String>,
    #[serde(default)]
    pub world_state: Option<String>,
    pub status: GoalStatus,
    /// Work queue that carries this goal's dispatched work items.
    pub queue_name: String,
    /// Pid of the supervisor believed to be running; `0` means none.
    #[serde(default)]
    pub supervisor_pid: i32,
    /// Milliseconds since the epoch of the last spawn; `0` when unset.
    #[serde(default)]
    pub supervisor_started_at: i64,
}

impl Goal {
    pub fn has_supervisor(&self) -> bool {
        self.supervisor_pid > 0
    }
}

/// A planned step toward a goal, possibly decomposed into children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub goal_id: String,
    #[serde(default)]
    pub parent_action_id: Option<String>,
    pub description: String,
    /// JSON array of assertion names, raw.
    #[serde(default)]
    pub preconditions: Option<String>,
    /// JSON array of assertion names, raw.
    #[serde(default)]
    pub effects: Option<String>,
    #[serde(default)]
    pub is_compound: bool,
    #[serde(default)]
    pub role: String,
    pub status: ActionStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub work_item_id: Option<String>,
}

/// A dispatched unit of remote work. Read-only for the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub status: WorkItemStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Goal progress as computed by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Progress {
    pub complete: bool,
    pub satisfied: usize,
    pub total: usize,
}

/// Per-status action counts for a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ActionCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ActionCounts {
    pub fn tally(actions: &[Action]) -> Self {
        let mut counts = Self::default();
        for action in actions {
            match action.status {
                ActionStatus::Pending => counts.pending += 1,
                ActionStatus::Running => counts.running += 1,
                ActionStatus::Completed => counts.completed += 1,
                ActionStatus::Failed => counts.failed += 1,
                ActionStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.skipped
    }
}

//! Goal persistence.
//!
//! [`GoalStore`] is the seam the orchestrator and supervisor use; the
//! file-backed [`FileGoalStore`] keeps one JSON document per goal under
//! `.conductor/state/goals/`.

use std::path::PathBuf;

use anyhow::Result;
use thiserror::Error;
use tracing::debug;

use super::records::RecordDir;
use crate::core::types::{Goal, GoalStatus};

/// Store conditions callers branch on. Carried inside `anyhow::Error`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("goal not found: {0}")]
    GoalNotFound(String),

    #[error("action not found: {0}")]
    ActionNotFound(String),
}

/// True when `err` is (or wraps) a missing-goal condition.
pub fn is_goal_not_found(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<StoreError>(),
        Some(StoreError::GoalNotFound(_))
    )
}

/// Access to goal records. Implementations serialize concurrent access.
pub trait GoalStore {
    /// Fetch one goal. Fails with [`StoreError::GoalNotFound`] if missing.
    fn get(&self, goal_id: &str) -> Result<Goal>;
    fn list_all(&self) -> Result<Vec<Goal>>;
    fn list_by_status(&self, status: GoalStatus) -> Result<Vec<Goal>>;
    fn update_status(&self, goal_id: &str, status: GoalStatus) -> Result<()>;
    /// Record the supervisor believed to be running. `pid == 0` clears it.
    fn update_supervisor(&self, goal_id: &str, pid: i32, started_at: i64) -> Result<()>;
}

/// One JSON file per goal.
#[derive(Debug, Clone)]
pub struct FileGoalStore {
    records: RecordDir,
}

impl FileGoalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            records: RecordDir::new(dir),
        }
    }

    /// Create or replace a goal. Goals are authored outside this crate; this
    /// is how tools and tests seed them.
    pub fn save(&self, goal: &Goal) -> Result<()> {
        let _lock = self.records.lock()?;
        self.records.write(&goal.id, goal)
    }

    fn modify(&self, goal_id: &str, apply: impl FnOnce(&mut Goal)) -> Result<()> {
        let _lock = self.records.lock()?;
        let mut goal: Goal = self
            .records
            .load(goal_id)?
            .ok_or_else(|| StoreError::GoalNotFound(goal_id.to_string()))?;
        apply(&mut goal);
        self.records.write(goal_id, &goal)
    }
}

impl GoalStore for FileGoalStore {
    fn get(&self, goal_id: &str) -> Result<Goal> {
        let goal = self
            .records
            .load(goal_id)?
            .ok_or_else(|| StoreError::GoalNotFound(goal_id.to_string()))?;
        Ok(goal)
    }

    fn list_all(&self) -> Result<Vec<Goal>> {
        self.records.list()
    }

    fn list_by_status(&self, status: GoalStatus) -> Result<Vec<Goal>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|goal| goal.status == status)
            .collect())
    }

    fn update_status(&self, goal_id: &str, status: GoalStatus) -> Result<()> {
        debug!(goal_id, %status, "updating goal status");
        self.modify(goal_id, |goal| goal.status = status)
    }

    fn update_supervisor(&self, goal_id: &str, pid: i32, started_at: i64) -> Result<()> {
        debug!(goal_id, pid, started_at, "updating supervisor record");
        self.modify(goal_id, |goal| {
            goal.supervisor_pid = pid;
            goal.supervisor_started_at = started_at;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::goal;

    #[test]
    fn missing_goal_is_a_typed_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileGoalStore::new(temp.path());
        let err = store.get("nope").expect_err("missing goal");
        assert!(is_goal_not_found(&err));
        let err = store
            .update_status("nope", GoalStatus::Paused)
            .expect_err("missing goal");
        assert_eq!(
            err.downcast_ref::<StoreError>(),
            Some(&StoreError::GoalNotFound("nope".to_string()))
        );
    }

    #[test]
    fn updates_touch_only_their_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileGoalStore::new(temp.path());
        store.save(&goal("g1", GoalStatus::Active)).expect("save");

        store.update_supervisor("g1", 4242, 1_000).expect("record");
        store.update_status("g1", GoalStatus::Paused).expect("status");

        let loaded = store.get("g1").expect("get");
        assert_eq!(loaded.supervisor_pid, 4242);
        assert_eq!(loaded.supervisor_started_at, 1_000);
        assert_eq!(loaded.status, GoalStatus::Paused);
        assert_eq!(loaded.name, goal("g1", GoalStatus::Active).name);
    }

    #[test]
    fn list_by_status_filters() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileGoalStore::new(temp.path());
        store.save(&goal("a", GoalStatus::Active)).expect("save a");
        store.save(&goal("b", GoalStatus::Completed)).expect("save b");
        store.save(&goal("c", GoalStatus::Active)).expect("save c");

        let active: Vec<String> = store
            .list_by_status(GoalStatus::Active)
            .expect("list")
            .into_iter()
            .map(|g| g.id)
            .collect();
        assert_eq!(active, vec!["a", "c"]);
        assert_eq!(store.list_all().expect("all").len(), 3);
    }
}

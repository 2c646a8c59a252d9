//! Action persistence: `.conductor/state/actions/<id>.json`.

use std::path::PathBuf;

use anyhow::Result;
use tracing::debug;

use super::goal_store::StoreError;
use super::records::RecordDir;
use crate::core::types::{Action, ActionStatus};

/// Access to action records. The core only ever moves `status` and `result`.
pub trait ActionStore {
    fn list_by_goal(&self, goal_id: &str) -> Result<Vec<Action>>;
    fn list_running(&self, goal_id: &str) -> Result<Vec<Action>>;
    /// Set status and result. `result == None` clears any previous result.
    fn update_status(&self, action_id: &str, status: ActionStatus, result: Option<&str>)
    -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileActionStore {
    records: RecordDir,
}

impl FileActionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            records: RecordDir::new(dir),
        }
    }

    pub fn save(&self, action: &Action) -> Result<()> {
        let _lock = self.records.lock()?;
        self.records.write(&action.id, action)
    }

    pub fn get(&self, action_id: &str) -> Result<Action> {
        let action = self
            .records
            .load(action_id)?
            .ok_or_else(|| StoreError::ActionNotFound(action_id.to_string()))?;
        Ok(action)
    }
}

impl ActionStore for FileActionStore {
    fn list_by_goal(&self, goal_id: &str) -> Result<Vec<Action>> {
        Ok(self
            .records
            .list::<Action>()?
            .into_iter()
            .filter(|action| action.goal_id == goal_id)
            .collect())
    }

    fn list_running(&self, goal_id: &str) -> Result<Vec<Action>> {
        Ok(self
            .list_by_goal(goal_id)?
            .into_iter()
            .filter(|action| action.status == ActionStatus::Running)
            .collect())
    }

    fn update_status(
        &self,
        action_id: &str,
        status: ActionStatus,
        result: Option<&str>,
    ) -> Result<()> {
        debug!(action_id, %status, "updating action status");
        let _lock = self.records.lock()?;
        let mut action: Action = self
            .records
            .load(action_id)?
            .ok_or_else(|| StoreError::ActionNotFound(action_id.to_string()))?;
        action.status = status;
        action.result = result.map(str::to_string);
        self.records.write(action_id, &action)
    }
}

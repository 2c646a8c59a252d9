//! `conductor status`: a read-only overview of goals and their supervisors.

use anyhow::Result;
use serde::Serialize;

use crate::core::goap::check_progress;
use crate::core::types::{GoalStatus, Progress};
use crate::io::goal_store::GoalStore;
use crate::io::proc_table::ProcessTable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoalReport {
    pub id: String,
    pub name: String,
    pub status: GoalStatus,
    pub supervisor_pid: i32,
    /// Whether the recorded supervisor process exists right now.
    pub supervisor_alive: bool,
    pub progress: Progress,
}

/// Describe every goal. Does not modify the store.
pub fn collect_status(store: &dyn GoalStore, processes: &dyn ProcessTable) -> Result<Vec<GoalReport>> {
    Ok(store
        .list_all()?
        .into_iter()
        .map(|goal| GoalReport {
            progress: check_progress(goal.goal_state.as_deref(), goal.world_state.as_deref()),
            supervisor_alive: goal.has_supervisor() && processes.is_alive(goal.supervisor_pid),
            id: goal.id,
            name: goal.name,
            status: goal.status,
            supervisor_pid: goal.supervisor_pid,
        })
        .collect())
}

/// One line per goal: id, status, supervisor, progress, name.
pub fn render_status(reports: &[GoalReport]) -> String {
    let mut buf = String::new();
    for report in reports {
        let supervisor = match (report.supervisor_pid, report.supervisor_alive) {
            (0, _) => "-".to_string(),
            (pid, true) => format!("pid {pid}"),
            (pid, false) => format!("pid {pid} (dead)"),
        };
        buf.push_str(&format!(
            "{}\t{}\t{}\t{}/{}\t{}\n",
            report.id,
            report.status,
            supervisor,
            report.progress.satisfied,
            report.progress.total,
            report.name
        ));
    }
    buf
}

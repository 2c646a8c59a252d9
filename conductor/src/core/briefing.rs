//! Rendering of the status summary handed to the session as its opening turn.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::goap::check_progress;
use crate::core::types::{ActionCounts, Goal, SupervisorPhase};

const SUPERVISOR_TEMPLATE: &str = include_str!("../prompts/supervisor.md");

/// Inputs for the opening status summary.
#[derive(Debug, Clone)]
pub struct Briefing<'a> {
    pub goal: &'a Goal,
    pub phase: SupervisorPhase,
    pub counts: ActionCounts,
    /// Actions whose status changed during orphan recovery.
    pub recovered: usize,
}

/// Render the status summary for `briefing`.
pub fn render_briefing(briefing: &Briefing<'_>) -> Result<String> {
    let goal = briefing.goal;
    let progress = check_progress(goal.goal_state.as_deref(), goal.world_state.as_deref());

    let mut env = Environment::new();
    env.add_template("supervisor", SUPERVISOR_TEMPLATE)
        .context("load supervisor template")?;
    let template = env
        .get_template("supervisor")
        .context("get supervisor template")?;
    let rendered = template
        .render(context! {
            name => goal.name.as_str(),
            id => goal.id.as_str(),
            description => goal.description.as_deref().unwrap_or("(none)"),
            goal_state => goal.goal_state.as_deref().unwrap_or("{}"),
            world_state => goal.world_state.as_deref().unwrap_or("{}"),
            progress => progress,
            counts => briefing.counts,
            action_total => briefing.counts.total(),
            recovered => briefing.recovered,
            phase => briefing.phase.as_str(),
        })
        .context("render supervisor template")?;
    Ok(rendered)
}

//! Model-free goal-state evaluation.
//!
//! Both functions take raw JSON text so that absent and malformed documents
//! keep their distinct meanings:
//!
//! - preconditions: absent, malformed, empty, or not an array => satisfied
//! - world state: absent or malformed => nothing holds
//! - goal state: absent, malformed, or not an object => no progress, never complete

use serde_json::{Map, Value};

use crate::core::types::Progress;

/// Returns true when every assertion named in `preconditions` is `true` in
/// `world_state`.
pub fn preconditions_met(preconditions: Option<&str>, world_state: Option<&str>) -> bool {
    let Some(preconditions) = preconditions else {
        return true;
    };
    let Some(world) = parse_object(world_state) else {
        return false;
    };
    let names = match serde_json::from_str::<Value>(preconditions) {
        Ok(Value::Array(names)) => names,
        _ => return true,
    };
    names.iter().all(|name| match name {
        Value::String(key) => assertion_holds(&world, key),
        _ => false,
    })
}

/// Count how many goal assertions currently hold in the world state.
pub fn check_progress(goal_state: Option<&str>, world_state: Option<&str>) -> Progress {
    let Some(goal) = parse_object(goal_state) else {
        return Progress::default();
    };
    let world = parse_object(world_state).unwrap_or_default();
    let total = goal.len();
    let satisfied = goal
        .keys()
        .filter(|key| assertion_holds(&world, key))
        .count();
    Progress {
        complete: total > 0 && satisfied == total,
        satisfied,
        total,
    }
}

fn parse_object(doc: Option<&str>) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(doc?) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn assertion_holds(world: &Map<String, Value>, key: &str) -> bool {
    matches!(world.get(key), Some(Value::Bool(true)))
}

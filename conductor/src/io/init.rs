//! Layout of the `.conductor/` directory and its scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{ConductorConfig, write_config};

const GITIGNORE: &str = "logs/\nsessions/\n";

/// All canonical paths within `.conductor/` for a project root.
#[derive(Debug, Clone)]
pub struct ConductorPaths {
    pub root: PathBuf,
    pub conductor_dir: PathBuf,
    pub config_path: PathBuf,
    pub gitignore_path: PathBuf,
    pub goals_dir: PathBuf,
    pub actions_dir: PathBuf,
    pub queues_dir: PathBuf,
    pub inbox_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl ConductorPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let conductor_dir = root.join(".conductor");
        let state_dir = conductor_dir.join("state");
        Self {
            root: root.clone(),
            conductor_dir: conductor_dir.clone(),
            config_path: conductor_dir.join("config.toml"),
            gitignore_path: conductor_dir.join(".gitignore"),
            goals_dir: state_dir.join("goals"),
            actions_dir: state_dir.join("actions"),
            queues_dir: conductor_dir.join("queues"),
            inbox_dir: conductor_dir.join("inbox"),
            sessions_dir: conductor_dir.join("sessions"),
            logs_dir: conductor_dir.join("logs"),
        }
    }

    pub fn goal_inbox(&self, goal_id: &str) -> PathBuf {
        self.inbox_dir.join(goal_id)
    }

    pub fn transcript_path(&self, goal_id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{goal_id}.md"))
    }

    pub fn log_path(&self, goal_id: &str) -> PathBuf {
        self.logs_dir.join(format!("{goal_id}.log"))
    }

    /// Fail unless `init` has been run for this root.
    pub fn ensure_initialized(&self) -> Result<()> {
        if !self.conductor_dir.is_dir() {
            return Err(anyhow!(
                "{} not found (run `conductor init`)",
                self.conductor_dir.display()
            ));
        }
        Ok(())
    }
}

/// Options for `init_conductor`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite the existing config and gitignore.
    pub force: bool,
}

/// Create `.conductor/` scaffolding in `root`.
///
/// Fails if `.conductor/` already exists unless `options.force` is set.
/// Existing goals, actions, and queues are never touched.
pub fn init_conductor(root: &Path, options: &InitOptions) -> Result<ConductorPaths> {
    let paths = ConductorPaths::new(root);
    if paths.conductor_dir.exists() && !paths.conductor_dir.is_dir() {
        return Err(anyhow!(
            "conductor init: .conductor exists but is not a directory"
        ));
    }
    if paths.conductor_dir.exists() && !options.force {
        return Err(anyhow!(
            "conductor init: .conductor already exists (use --force to overwrite)"
        ));
    }

    for dir in [
        &paths.conductor_dir,
        &paths.goals_dir,
        &paths.actions_dir,
        &paths.queues_dir,
        &paths.inbox_dir,
        &paths.sessions_dir,
        &paths.logs_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }
    fs::write(&paths.gitignore_path, GITIGNORE)
        .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &ConductorConfig::default())?;
    Ok(paths)
}

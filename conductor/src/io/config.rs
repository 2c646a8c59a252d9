//! Conductor configuration stored under `.conductor/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use super::records::write_atomic;

/// Conductor configuration (TOML).
///
/// Intended to be edited by humans. Missing fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConductorConfig {
    /// A supervisor older than this is considered stale and forgotten.
    pub stale_after_secs: u64,

    /// Delay between the graceful and the forceful termination signal.
    pub kill_grace_ms: u64,

    /// Upper bound on one readiness wait in the supervisor loop.
    pub wait_timeout_secs: u64,

    /// Consecutive notification failures a supervisor tolerates.
    pub max_consecutive_failures: u32,

    /// Period of the watchdog reconciliation pass.
    pub watch_interval_secs: u64,

    /// How often the inbox watcher rescans the inbox directory.
    pub inbox_poll_interval_ms: u64,

    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Agent command; the transcript is written to its stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command: vec!["claude".to_string(), "-p".to_string()],
            timeout_secs: 30 * 60,
            output_limit_bytes: 200_000,
        }
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 60 * 60,
            kill_grace_ms: 100,
            wait_timeout_secs: 5,
            max_consecutive_failures: 3,
            watch_interval_secs: 10,
            inbox_poll_interval_ms: 250,
            session: SessionConfig::default(),
        }
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stale_after_secs == 0 {
            return Err(anyhow!("stale_after_secs must be > 0"));
        }
        if self.wait_timeout_secs == 0 {
            return Err(anyhow!("wait_timeout_secs must be > 0"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(anyhow!("max_consecutive_failures must be > 0"));
        }
        if self.watch_interval_secs == 0 {
            return Err(anyhow!("watch_interval_secs must be > 0"));
        }
        if self.inbox_poll_interval_ms == 0 {
            return Err(anyhow!("inbox_poll_interval_ms must be > 0"));
        }
        if self.session.timeout_secs == 0 {
            return Err(anyhow!("session.timeout_secs must be > 0"));
        }
        if self.session.output_limit_bytes == 0 {
            return Err(anyhow!("session.output_limit_bytes must be > 0"));
        }
        if self.session.command.is_empty() || self.session.command[0].trim().is_empty() {
            return Err(anyhow!("session.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_secs(self.watch_interval_secs)
    }

    pub fn inbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.inbox_poll_interval_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ConductorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ConductorConfig> {
    if !path.exists() {
        return Ok(ConductorConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConductorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ConductorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ConductorConfig::default());
        assert_eq!(cfg.stale_after(), Duration::from_secs(3600));
        assert_eq!(cfg.kill_grace(), Duration::from_millis(100));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = ConductorConfig::default();
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "watch_interval_secs = 2\n[session]\ncommand = [\"cat\"]\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.watch_interval_secs, 2);
        assert_eq!(cfg.session.command, vec!["cat"]);
        assert_eq!(cfg.session.timeout_secs, 1800);
        assert_eq!(cfg.max_consecutive_failures, 3);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[session]\ncommand = []\n").expect("write");
        let err = load_config(&path).expect_err("empty command");
        assert!(format!("{err:#}").contains("session.command"));
    }
}

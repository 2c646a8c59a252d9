//! Directories of JSON records, one file per record.
//!
//! Writes are atomic (temp file + rename). Read-modify-write sequences take
//! an advisory lock on a sibling lock file so concurrent processes (the
//! watchdog and every supervisor) serialize their updates.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::os;

/// A directory holding `<id>.json` records of one kind.
#[derive(Debug, Clone)]
pub struct RecordDir {
    dir: PathBuf,
    lock_path: PathBuf,
}

/// Held for the duration of a read-modify-write; releases on drop.
#[derive(Debug)]
pub struct RecordLock {
    _file: File,
}

impl RecordDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let lock_path = dir.join(".lock");
        Self { dir, lock_path }
    }

    /// Take the directory's exclusive lock.
    pub fn lock(&self) -> Result<RecordLock> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create directory {}", self.dir.display()))?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .with_context(|| format!("open lock {}", self.lock_path.display()))?;
        os::lock_exclusive(&file).with_context(|| format!("lock {}", self.lock_path.display()))?;
        Ok(RecordLock { _file: file })
    }

    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{id}.json")))
    }

    /// Load one record. Returns `None` when the file does not exist.
    pub fn load<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        let path = self.path_for(id)?;
        if !path.exists() {
            return Ok(None);
        }
        read_record(&path).map(Some)
    }

    /// Load every record in the directory, sorted by file name.
    ///
    /// Files that fail to parse are skipped with a warning so one corrupt
    /// record does not hide the rest.
    pub fn list<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in
            fs::read_dir(&self.dir).with_context(|| format!("read {}", self.dir.display()))?
        {
            let entry = entry.with_context(|| format!("read entry in {}", self.dir.display()))?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            match read_record(&path) {
                Ok(record) => records.push(record),
                Err(err) => warn!(path = %path.display(), err = %format!("{err:#}"), "skipping unreadable record"),
            }
        }
        Ok(records)
    }

    /// Atomically write one record.
    pub fn write<T: Serialize>(&self, id: &str, record: &T) -> Result<()> {
        let path = self.path_for(id)?;
        let mut buf = serde_json::to_string_pretty(record).context("serialize record")?;
        buf.push('\n');
        write_atomic(&path, &buf)?;
        debug!(path = %path.display(), "record written");
        Ok(())
    }
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Record ids become file names; reject anything that could escape the
/// directory.
fn validate_id(id: &str) -> Result<()> {
    if id.is_empty()
        || id.starts_with('.')
        || id.contains(['/', '\\', '\0'])
    {
        return Err(anyhow!("invalid record id {id:?}"));
    }
    Ok(())
}

/// Write `contents` to `path` via a temp file and rename.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

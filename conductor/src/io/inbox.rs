//! Per-goal inbox: the notification channel of the standalone binary.
//!
//! Other agents drop `{"from", "channel", "body"}` JSON files into
//! `.conductor/inbox/<goal_id>/`. A polling watcher raises the channel's
//! readiness signal whenever the directory changes; fetching drains a
//! bounded bundle of messages and deletes their files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event as NotifyEvent, PollWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use super::reactor::{Doorbell, Signal, SignalId};
use super::records::write_atomic;
use crate::core::notifications::{InboxMessage, render_notifications, split_bundle};

/// Rendered notifications ready to hand to the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationBundle {
    pub text: String,
    pub count: usize,
}

/// Source of inter-agent notifications for one goal.
pub trait NotificationChannel {
    /// Readiness signal raised when messages may be waiting.
    fn readiness(&self) -> SignalId;
    /// Lower the readiness signal before processing.
    fn clear(&self);
    /// Drain the next bundle. `count == 0` means nothing was pending.
    fn fetch_bundle(&mut self) -> Result<NotificationBundle>;
}

/// Directory-backed [`NotificationChannel`].
pub struct InboxChannel {
    dir: PathBuf,
    signal: Signal,
    _watcher: PollWatcher,
}

impl InboxChannel {
    pub fn open(dir: impl Into<PathBuf>, doorbell: &Doorbell, poll_interval: Duration) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).with_context(|| format!("create inbox {}", dir.display()))?;

        let signal = doorbell.signal();
        let raiser = signal.clone();
        let mut watcher = PollWatcher::new(
            move |res: Result<NotifyEvent, notify::Error>| match res {
                Ok(_) => raiser.raise(),
                Err(err) => warn!(err = %err, "inbox watcher error"),
            },
            notify::Config::default().with_poll_interval(poll_interval),
        )
        .context("create inbox watcher")?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch inbox {}", dir.display()))?;
        info!(path = %dir.display(), "watching inbox");

        if !pending_messages(&dir)?.is_empty() {
            signal.raise();
        }
        Ok(Self {
            dir,
            signal,
            _watcher: watcher,
        })
    }
}

impl NotificationChannel for InboxChannel {
    fn readiness(&self) -> SignalId {
        self.signal.id()
    }

    fn clear(&self) {
        self.signal.clear();
    }

    fn fetch_bundle(&mut self) -> Result<NotificationBundle> {
        let mut entries = Vec::new();
        for path in pending_messages(&self.dir)? {
            let contents = match fs::read_to_string(&path) {
                Ok(contents) => contents,
                // Raced with another reader or the sender's rename.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
            };
            match serde_json::from_str::<InboxMessage>(&contents) {
                Ok(message) => entries.push((path, message)),
                Err(err) => {
                    warn!(path = %path.display(), err = %err, "discarding malformed message");
                    remove_message(&path)?;
                }
            }
        }

        let (kept, overflow) = split_bundle(entries, |(_, message)| message);
        let messages: Vec<InboxMessage> = kept.iter().map(|(_, m)| m.clone()).collect();
        let Some(text) = render_notifications(&messages) else {
            return Ok(NotificationBundle::default());
        };
        for (path, _) in &kept {
            remove_message(path)?;
        }
        if !overflow.is_empty() {
            debug!(remaining = overflow.len(), "inbox overflow left for next bundle");
            self.signal.raise();
        }
        Ok(NotificationBundle {
            text,
            count: messages.len(),
        })
    }
}

/// `*.json` files in the inbox, oldest name first.
fn pending_messages(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read inbox {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("read inbox entry in {}", dir.display()))?
            .path();
        if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn remove_message(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
    }
}

static POST_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Deliver `message` into the inbox at `dir`. Returns the message file.
pub fn post_message(dir: &Path, message: &InboxMessage) -> Result<PathBuf> {
    let seq = POST_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let name = format!(
        "{:013}-{}-{seq:06}.json",
        chrono::Utc::now().timestamp_millis(),
        std::process::id()
    );
    let path = dir.join(name);
    let body = serde_json::to_string(message).context("serialize message")?;
    write_atomic(&path, &body)?;
    Ok(path)
}

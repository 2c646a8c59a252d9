//! Cooperative shutdown on SIGINT/SIGTERM.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::os;
use super::reactor::Doorbell;

/// Cancellation flag handed to long-running loops.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    cancelled: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Route termination signals to `token`, waking `doorbell` so that a loop
/// blocked in a readiness wait notices promptly.
///
/// Blocks SIGINT/SIGTERM in the calling thread; call this before spawning any
/// other thread so the mask is inherited everywhere.
pub fn install(token: &ShutdownToken, doorbell: &Doorbell) -> Result<()> {
    let signals = os::block_termination_signals().context("block termination signals")?;
    let token = token.clone();
    let doorbell = doorbell.clone();
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            match os::wait_for_signal(&signals) {
                Ok(signal) => info!(signal, "termination signal received"),
                Err(err) => warn!(err = %err, "signal wait failed, shutting down"),
            }
            token.cancel();
            doorbell.wake();
        })
        .context("spawn signal thread")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = ShutdownToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }
}

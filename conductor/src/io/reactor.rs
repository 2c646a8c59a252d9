//! Readiness multiplexing for the supervisor loop.
//!
//! A [`Doorbell`] hands out [`Signal`]s to event sources (the notification
//! channel, each worker's approval channel). Sources raise their signal from
//! any thread; the loop builds an [`Interest`] set each iteration, blocks in
//! [`Doorbell::wait`] until one of those signals is raised or the timeout
//! expires, and dispatches on the returned keys.
//!
//! Signals are level-triggered: a raised signal stays raised until its source
//! clears it.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Identifies one signal within its doorbell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(u64);

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    raised: HashSet<SignalId>,
    /// Set by [`Doorbell::wake`]; consumed by the next wait.
    woken: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    cond: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding this lock cannot leave the sets inconsistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Shared wait point for every readiness source of one loop.
#[derive(Debug, Clone, Default)]
pub struct Doorbell {
    shared: Arc<Shared>,
}

/// A readiness flag owned by one event source.
#[derive(Debug, Clone)]
pub struct Signal {
    id: SignalId,
    shared: Arc<Shared>,
}

/// Sources the loop is interested in this iteration, keyed by `K`.
#[derive(Debug)]
pub struct Interest<K> {
    entries: Vec<(K, SignalId)>,
}

impl<K: Copy + PartialEq> Interest<K> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, key: K, signal: SignalId) {
        self.entries.push((key, signal));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Copy + PartialEq> Default for Interest<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Keys whose signals were raised when a wait returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ready<K> {
    keys: Vec<K>,
}

impl<K: Copy + PartialEq> Ready<K> {
    pub fn contains(&self, key: K) -> bool {
        self.keys.contains(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }
}

impl Doorbell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new signal, initially lowered.
    pub fn signal(&self) -> Signal {
        let mut state = self.shared.lock();
        let id = SignalId(state.next_id);
        state.next_id += 1;
        Signal {
            id,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Interrupt the current wait without raising a source. A wake with no
    /// wait in progress makes the next wait return immediately.
    pub fn wake(&self) {
        let mut state = self.shared.lock();
        state.woken = true;
        self.shared.cond.notify_all();
    }

    /// Block until a signal in `interest` is raised, [`Doorbell::wake`] is
    /// called, or `timeout` elapses. Returns the raised keys (empty on
    /// timeout or wake).
    pub fn wait<K: Copy + PartialEq>(&self, interest: &Interest<K>, timeout: Duration) -> Ready<K> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            let keys: Vec<K> = interest
                .entries
                .iter()
                .filter(|(_, id)| state.raised.contains(id))
                .map(|(key, _)| *key)
                .collect();
            if state.woken {
                state.woken = false;
                return Ready { keys };
            }
            if !keys.is_empty() {
                return Ready { keys };
            }
            let now = Instant::now();
            if now >= deadline {
                return Ready { keys };
            }
            state = match self.shared.cond.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

impl Signal {
    pub fn id(&self) -> SignalId {
        self.id
    }

    pub fn raise(&self) {
        let mut state = self.shared.lock();
        if state.raised.insert(self.id) {
            self.shared.cond.notify_all();
        }
    }

    pub fn clear(&self) {
        self.shared.lock().raised.remove(&self.id);
    }

    pub fn is_raised(&self) -> bool {
        self.shared.lock().raised.contains(&self.id)
    }
}

//! Record of dispatched tasks.
//!
//! Each dispatch key moves through `not sent -> in flight -> completed`. A failed dispatch
//! removes its key so the task can be retried. Completed keys are kept for the lifetime of the
//! history unless the [`EvictionPolicy`] expires them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Source of the current time for the history.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The system's monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Controls how long completed keys block a new dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Completed keys older than this are forgotten. `None` keeps them forever.
    pub completed_ttl: Option<Duration>,
}

impl EvictionPolicy {
    pub fn keep_forever() -> Self {
        Self { completed_ttl: None }
    }

    pub fn completed_ttl(ttl: Duration) -> Self {
        Self {
            completed_ttl: Some(ttl),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    InFlight,
    Completed,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    state: DispatchState,
    since: Instant,
}

/// Thread safe set of dispatch keys with their state.
pub struct DispatchHistory {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    policy: EvictionPolicy,
}

impl DispatchHistory {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self::with_clock(policy, Arc::new(SystemClock))
    }

    pub fn with_clock(policy: EvictionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            policy,
        }
    }

    /// Marks `key` as in flight.
    ///
    /// Returns false if the key is already in flight or completed (and not yet expired), in
    /// which case the task must not be sent again. The check and the insert happen under one
    /// lock.
    pub fn try_begin(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).is_some_and(|entry| !self.is_expired(entry, now)) {
            return false;
        }
        entries.insert(
            key.to_string(),
            Entry {
                state: DispatchState::InFlight,
                since: now,
            },
        );
        true
    }

    /// Marks `key` as completed.
    pub fn complete(&self, key: &str) {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key.to_string(),
            Entry {
                state: DispatchState::Completed,
                since: now,
            },
        );
    }

    /// Forgets `key` so that the next dispatch sends it again.
    pub fn fail(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }

    pub fn state(&self, key: &str) -> Option<DispatchState> {
        let now = self.clock.now();
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| !self.is_expired(entry, now))
            .map(|entry| entry.state)
    }

    /// Drops expired completed keys.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, entry| !self.is_expired(entry, now));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        match (entry.state, self.policy.completed_ttl) {
            (DispatchState::Completed, Some(ttl)) => now.saturating_duration_since(entry.since) >= ttl,
            _ => false,
        }
    }
}

impl Default for DispatchHistory {
    fn default() -> Self {
        Self::new(EvictionPolicy::default())
    }
}

impl std::fmt::Debug for DispatchHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHistory")
            .field("len", &self.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

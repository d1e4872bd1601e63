//! Per-identity cool-down gate.
//!
//! A confirmed match is reported as an event only if the identity has never
//! been reported, or its last report is at least `cooldown` old. The
//! read-compare-write on an identity's timestamp happens under `&mut self`,
//! so a gate has exactly one writer at a time. Use [`SharedDebounceGate`]
//! when several threads feed the same session.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default cool-down between two events for the same identity.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// Identity → time of its last emitted event.
///
/// Entries are only created or updated on emission and never removed, so
/// the map is bounded by the gallery size.
#[derive(Debug, Default, Clone)]
pub struct DebounceState {
    last_emitted: HashMap<String, Instant>,
}

impl DebounceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_emitted(&self, identity: &str) -> Option<Instant> {
        self.last_emitted.get(identity).copied()
    }

    pub fn len(&self) -> usize {
        self.last_emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_emitted.is_empty()
    }
}

/// Decide whether a sighting of `identity` at `now` is a new event.
///
/// On `true` the state already records `now` for the identity; on `false`
/// the state is untouched. A `now` earlier than the recorded time counts as
/// zero elapsed time.
pub fn should_emit(
    identity: &str,
    now: Instant,
    cooldown: Duration,
    state: &mut DebounceState,
) -> bool {
    let due = match state.last_emitted.get(identity) {
        None => true,
        Some(&last) => now.saturating_duration_since(last) >= cooldown,
    };
    if due {
        state.last_emitted.insert(identity.to_string(), now);
    }
    due
}

/// Debounce state paired with its cool-down, owned by one session.
#[derive(Debug, Clone)]
pub struct DebounceGate {
    cooldown: Duration,
    state: DebounceState,
}

impl DebounceGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            state: DebounceState::new(),
        }
    }

    pub fn should_emit(&mut self, identity: &str, now: Instant) -> bool {
        should_emit(identity, now, self.cooldown, &mut self.state)
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn state(&self) -> &DebounceState {
        &self.state
    }

    pub fn into_shared(self) -> SharedDebounceGate {
        SharedDebounceGate {
            inner: Mutex::new(self),
        }
    }
}

impl Default for DebounceGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

/// A [`DebounceGate`] behind one global lock.
///
/// Concurrent calls are serialized, so when two callers race on the same
/// identity only the first to take the lock can emit.
#[derive(Debug)]
pub struct SharedDebounceGate {
    inner: Mutex<DebounceGate>,
}

impl SharedDebounceGate {
    pub fn should_emit(&self, identity: &str, now: Instant) -> bool {
        // The critical section cannot panic half-way, so a poisoned lock
        // still holds consistent state.
        let mut gate = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        gate.should_emit(identity, now)
    }

    pub fn into_inner(self) -> DebounceGate {
        self.inner.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

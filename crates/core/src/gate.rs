//! Per-session response gate.
//!
//! At most one "compose and send a response" cycle may be in flight per
//! session, and a new cycle is suppressed if it starts too soon after the
//! previous one finished. Every producer of a "process this input" action
//! checks the gate, not only the eventual responder.
//!
//! Callers that use [`ResponseGate::lock`] directly must call
//! [`ResponseGate::unlock`] on every exit path, errors included, or the
//! session stays blocked. [`ResponseGate::try_acquire`] returns a guard that
//! does this on drop.

use crate::events::SessionId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy)]
struct GateEntry {
    locked: bool,
    last_unlock: Option<Instant>,
}

impl GateEntry {
    fn within(&self, window: Duration) -> bool {
        self.last_unlock
            .is_some_and(|unlocked| unlocked.elapsed() < window)
    }
}

#[derive(Debug, Default)]
pub struct ResponseGate {
    entries: DashMap<SessionId, GateEntry>,
}

impl ResponseGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` unless a response is currently locked in for the session.
    pub fn can_respond(&self, session_id: &SessionId) -> bool {
        !self
            .entries
            .get(session_id)
            .is_some_and(|entry| entry.locked)
    }

    /// Marks a response as in flight. Must precede any composition work.
    pub fn lock(&self, session_id: &SessionId) {
        self.entries
            .entry(session_id.clone())
            .and_modify(|entry| entry.locked = true)
            .or_insert(GateEntry {
                locked: true,
                last_unlock: None,
            });
        trace!(session_id = %session_id, "Response gate locked");
    }

    /// Clears the lock and starts the debounce window.
    pub fn unlock(&self, session_id: &SessionId) {
        self.entries.insert(
            session_id.clone(),
            GateEntry {
                locked: false,
                last_unlock: Some(Instant::now()),
            },
        );
        trace!(session_id = %session_id, "Response gate unlocked");
    }

    /// `true` if the last unlock was less than `min_gap` ago. Sessions that
    /// never unlocked are not debounced.
    pub fn should_debounce(&self, session_id: &SessionId, min_gap: Duration) -> bool {
        self.entries
            .get(session_id)
            .is_some_and(|entry| entry.within(min_gap))
    }

    /// Atomically checks `can_respond && !should_debounce` and locks.
    ///
    /// The returned guard unlocks when dropped, so the lock is released on
    /// every exit path of the response cycle.
    pub fn try_acquire(
        self: &Arc<Self>,
        session_id: &SessionId,
        min_gap: Duration,
    ) -> Option<ResponseGuard> {
        match self.entries.entry(session_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.locked {
                    debug!(session_id = %session_id, "Response already in flight");
                    return None;
                }
                if entry.within(min_gap) {
                    debug!(session_id = %session_id, "Response debounced");
                    return None;
                }
                entry.locked = true;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(GateEntry {
                    locked: true,
                    last_unlock: None,
                });
            }
        }
        Some(ResponseGuard {
            gate: self.clone(),
            session_id: session_id.clone(),
        })
    }

    /// Forgets the session entirely; used on disconnect.
    pub fn release(&self, session_id: &SessionId) {
        self.entries.remove(session_id);
    }

    /// Drops unlocked entries whose debounce window has passed.
    pub fn prune(&self, window: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.locked || entry.within(window));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Holds a session's response lock; unlocks on drop.
#[derive(Debug)]
pub struct ResponseGuard {
    gate: Arc<ResponseGate>,
    session_id: SessionId,
}

impl ResponseGuard {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

impl Drop for ResponseGuard {
    fn drop(&mut self) {
        self.gate.unlock(&self.session_id);
    }
}

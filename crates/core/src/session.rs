//! Session registry.
//!
//! Each connected client gets one [`Session`] holding everything the engine
//! keeps per session: the weak transport handle and the segmenter's voice
//! state (buffer, timers, flags). It is looked up once per event; removing it
//! tears all of that down together.

use crate::events::{Event, SessionId};
use crate::segmenter::VoiceState;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// The outbound side of a client connection, owned by the transport layer.
pub trait Transport: Send + Sync {
    /// Delivers an event published on `topic` to the client.
    ///
    /// Returns `false` if the connection can no longer accept messages.
    fn deliver(&self, topic: &str, event: &Event) -> bool;
}

pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    transport: Weak<dyn Transport>,
    voice: Arc<Mutex<VoiceState>>,
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The transport handle, if the connection is still alive.
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.upgrade()
    }

    pub(crate) fn voice(&self) -> &Arc<Mutex<VoiceState>> {
        &self.voice
    }

    fn shutdown(&self) {
        self.voice.lock().release();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("connected", &(self.transport.strong_count() > 0))
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the session entry. Re-registering an id replaces the old entry
    /// and releases its per-session state.
    pub fn register<T>(&self, id: SessionId, transport: &Arc<T>) -> Arc<Session>
    where
        T: Transport + 'static,
    {
        let weak: Weak<dyn Transport> = Arc::downgrade(transport) as Weak<dyn Transport>;
        let session = Arc::new(Session {
            id: id.clone(),
            created_at: Utc::now(),
            transport: weak,
            voice: Arc::new(Mutex::new(VoiceState::default())),
        });
        if let Some(previous) = self.sessions.insert(id.clone(), session.clone()) {
            warn!(session_id = %id, "Session re-registered; releasing previous state");
            previous.shutdown();
        }
        info!(session_id = %id, "Session registered");
        session
    }

    /// Removes the session, canceling its timers and dropping buffered audio.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(id)?;
        session.shutdown();
        debug!(session_id = %id, "Session removed");
        Some(session)
    }

    /// The transport handle registered for `id`, if it is still alive.
    pub fn get(&self, id: &SessionId) -> Option<Arc<dyn Transport>> {
        self.sessions.get(id).and_then(|session| session.transport())
    }

    pub fn session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|session| session.clone())
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Payload;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTransport {
        delivered: AtomicUsize,
    }

    impl Transport for CountingTransport {
        fn deliver(&self, _topic: &str, _event: &Event) -> bool {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn test_register_get_remove() {
        let registry = SessionRegistry::new();
        let transport = Arc::new(CountingTransport::default());
        let id = SessionId::new("s1");

        registry.register(id.clone(), &transport);
        assert_eq!(registry.len(), 1);

        let handle = registry.get(&id).expect("transport should be reachable");
        handle.deliver(
            "transcript",
            &Event::new(id.clone(), Payload::UserText("hi".into())),
        );
        assert_eq!(transport.delivered.load(Ordering::SeqCst), 1);

        assert!(registry.remove(&id).is_some());
        assert!(registry.get(&id).is_none());
        assert!(registry.remove(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_transport_is_weakly_held() {
        let registry = SessionRegistry::new();
        let transport = Arc::new(CountingTransport::default());
        let id = SessionId::new("s1");
        registry.register(id.clone(), &transport);

        drop(transport);

        assert!(registry.contains(&id));
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn test_unknown_session_is_absent() {
        let registry = SessionRegistry::new();
        assert!(registry.get(&SessionId::new("nobody")).is_none());
        assert!(registry.session(&SessionId::new("nobody")).is_none());
    }
}

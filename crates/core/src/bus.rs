//! In-process publish/subscribe bus.
//!
//! `publish` runs every handler registered for the topic synchronously, in
//! subscription order, and returns as soon as they have all returned. Handlers
//! that need to do asynchronous work spawn it themselves; the bus never waits
//! for it and offers no delivery guarantee beyond one invocation per current
//! subscriber.

use crate::events::Event;
use dashmap::DashMap;
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, trace};

/// A bus subscriber.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifies one subscription so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct EventBus {
    topics: DashMap<String, Vec<(SubscriptionId, Handler)>>,
    next_id: AtomicU64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.topics.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `topic`. Handlers for the same topic run in the
    /// order they were subscribed.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.topics
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        trace!(topic, ?id, "Subscribed handler");
        id
    }

    /// Removes a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        let Some(mut handlers) = self.topics.get_mut(topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        before != handlers.len()
    }

    /// Invokes every handler currently subscribed to `topic`.
    ///
    /// The handler list is snapshotted first, so handlers may publish or
    /// subscribe re-entrantly. A panicking handler is logged and skipped; its
    /// siblings still run.
    pub fn publish(&self, topic: &str, event: Event) {
        let handlers: Vec<Handler> = match self.topics.get(topic) {
            Some(entry) => entry.iter().map(|(_, handler)| handler.clone()).collect(),
            None => Vec::new(),
        };
        if handlers.is_empty() {
            trace!(topic, session_id = %event.session_id, "No subscribers for topic");
            return;
        }

        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                error!(
                    topic,
                    session_id = %event.session_id,
                    reason = panic_message(panic.as_ref()),
                    "Bus handler panicked"
                );
            }
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |handlers| handlers.len())
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

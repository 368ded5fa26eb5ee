//! Event bus — in-process pub/sub keyed by channel name.
//!
//! Components publish here; every handler registered on the same channel
//! string receives the event synchronously, in publish order. Channel names
//! are derived from the session instance id, so independently configured
//! widgets on one process never cross-talk.
//!
//! The bus is explicitly constructed and injected, never a process global.
//! Cloning is cheap; clones share the same registry.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use tracing::error;

use bell_types::event::FeedEvent;

type Handler = Arc<dyn Fn(&FeedEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    channels: HashMap<String, Vec<(u64, Handler)>>,
    next_id: u64,
}

#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one channel. The returned guard unsubscribes
    /// when cancelled or dropped. Subscribing never replays past publishes.
    pub fn subscribe<F>(&self, channel: &str, handler: F) -> Subscription
    where
        F: Fn(&FeedEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .channels
            .entry(channel.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            channel: channel.to_string(),
            id,
        }
    }

    /// Deliver `event` to every handler currently registered on `channel`.
    ///
    /// Delivery is synchronous. The handler list is snapshotted before
    /// invocation, so handlers may publish, subscribe, or unsubscribe without
    /// deadlocking; a handler registered during delivery does not receive the
    /// in-flight event. A panicking handler is isolated and does not stop
    /// delivery to the rest.
    pub fn publish(&self, channel: &str, event: &FeedEvent) {
        let handlers: Vec<Handler> = {
            let registry = self.registry.lock().unwrap();
            match registry.channels.get(channel) {
                Some(entries) => entries.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return,
            }
        };
        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic".to_string());
                error!(channel, "event handler panicked: {}", detail);
            }
        }
    }
}

/// Unsubscribe capability returned by [`EventBus::subscribe`].
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    channel: String,
    id: u64,
}

impl Subscription {
    /// Explicitly remove the handler. Equivalent to dropping the guard.
    pub fn cancel(self) {}

    fn remove(&self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.lock().unwrap();
            if let Some(entries) = registry.channels.get_mut(&self.channel) {
                entries.retain(|(id, _)| *id != self.id);
                if entries.is_empty() {
                    registry.channels.remove(&self.channel);
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

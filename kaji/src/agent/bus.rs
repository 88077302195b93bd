//! Ordered, non-blocking event broadcast.
//!
//! Two observer forms with different loss guarantees:
//!
//! - **Inline handlers** registered with [`EventBus::on`] (or
//!   [`EventBus::on_any`]) run synchronously in emission order and never
//!   miss an event. They must not block on the agent loop.
//! - **Channel subscribers** from [`EventBus::subscribe`] get a bounded
//!   broadcast buffer; a subscriber that falls behind receives an
//!   explicit `Lagged` error instead of silently losing events.
//!
//! Emission never reorders events and never blocks beyond iterating the
//! registered handlers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;

use super::events::{AgentEvent, EventKind};

/// Callback invoked inline on every matching event.
pub type EventHandler = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// Typed event broadcaster for one agent.
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<EventHandler>>>,
    any_handlers: RwLock<Vec<EventHandler>>,
    channel: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    /// Creates a bus whose subscriber buffers hold `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (channel, _) = broadcast::channel(capacity.max(1));
        Self {
            handlers: RwLock::new(HashMap::new()),
            any_handlers: RwLock::new(Vec::new()),
            channel,
        }
    }

    /// Registers a handler for one event kind.
    pub fn on(&self, kind: EventKind, handler: EventHandler) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.entry(kind).or_default().push(handler);
        }
    }

    /// Registers a handler invoked for every event.
    pub fn on_any(&self, handler: EventHandler) {
        if let Ok(mut handlers) = self.any_handlers.write() {
            handlers.push(handler);
        }
    }

    /// Opens a buffered subscription to all events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.channel.subscribe()
    }

    /// Publishes an event to all observers, in registration order.
    pub fn emit(&self, event: &AgentEvent) {
        if let Ok(handlers) = self.handlers.read()
            && let Some(for_kind) = handlers.get(&event.kind())
        {
            for handler in for_kind {
                handler(event);
            }
        }
        if let Ok(handlers) = self.any_handlers.read() {
            for handler in handlers.iter() {
                handler(event);
            }
        }
        // No receivers is fine; send only fails then.
        let _ = self.channel.send(event.clone());
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.channel.receiver_count())
            .finish_non_exhaustive()
    }
}

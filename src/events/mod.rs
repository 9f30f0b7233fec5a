//! In-process event bus for session notifications.
//!
//! Decouples the network layer (producers) from UI/state consumers within
//! one process. Delivery is synchronous and best-effort: every handler runs
//! on the publishing thread, and a failing handler is logged and skipped.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Event emitted once per accepted join.
pub const PLAYER_JOINED: &str = "playerJoined";

/// Payload of [`PLAYER_JOINED`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerJoined {
    pub name: String,
}

/// Error type returned by handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by handlers.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Handler for events published on the bus.
///
/// Implemented for any `Fn(&Value) -> HandlerResult` closure.
pub trait EventHandler: Send + Sync {
    fn handle(&self, payload: &Value) -> HandlerResult;
}

impl<F> EventHandler for F
where
    F: Fn(&Value) -> HandlerResult + Send + Sync,
{
    fn handle(&self, payload: &Value) -> HandlerResult {
        self(payload)
    }
}

/// Identifies one registration on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type HandlerMap = HashMap<String, HashMap<HandlerId, Arc<dyn EventHandler>>>;

struct Inner {
    handlers: RwLock<HandlerMap>,
    next_id: AtomicU64,
}

impl Inner {
    fn remove(&self, event: &str, id: HandlerId) -> bool {
        let mut handlers = match self.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(set) = handlers.get_mut(event) else {
            return false;
        };
        let removed = set.remove(&id).is_some();
        if set.is_empty() {
            handlers.remove(event);
        }
        removed
    }
}

/// Process-wide publish/subscribe bus.
///
/// Cheap to clone; clones share the same handler registrations.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `handler` for `event`.
    ///
    /// The returned [`Subscription`] removes exactly this registration when
    /// [`Subscription::unsubscribe`] is called. Dropping it leaves the
    /// handler registered.
    pub fn subscribe<H>(&self, event: &str, handler: H) -> Subscription
    where
        H: EventHandler + 'static,
    {
        let id = HandlerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let count = {
            let mut handlers = self.write_handlers();
            let set = handlers.entry(event.to_string()).or_default();
            set.insert(id, Arc::new(handler));
            set.len()
        };

        debug!(event = %event, handler_count = count, "Handler subscribed");

        Subscription {
            bus: Arc::downgrade(&self.inner),
            event: event.to_string(),
            id,
        }
    }

    /// Register a handler that receives the payload decoded as `T`.
    ///
    /// A payload that does not decode counts as a handler failure.
    pub fn subscribe_event<T, F>(&self, event: &str, handler: F) -> Subscription
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe(event, move |payload: &Value| -> HandlerResult {
            let decoded = T::deserialize(payload)?;
            handler(decoded)
        })
    }

    /// Remove a registration. Unknown ids are ignored.
    pub fn unsubscribe(&self, event: &str, id: HandlerId) {
        if self.inner.remove(event, id) {
            debug!(event = %event, "Handler unsubscribed");
        }
    }

    /// Deliver `payload` to every handler registered for `event`.
    ///
    /// Handlers run on the calling thread against a snapshot of the
    /// registrations taken before the first handler runs. Errors and panics
    /// are logged and never reach the publisher. Returns the number of
    /// handlers invoked.
    pub fn publish(&self, event: &str, payload: &Value) -> usize {
        // Snapshot under the read lock, release before calling out.
        let snapshot: Vec<Arc<dyn EventHandler>> = {
            let handlers = self.read_handlers();
            match handlers.get(event) {
                Some(set) => set.values().cloned().collect(),
                None => return 0,
            }
        };

        for handler in &snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(payload))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(event = %event, error = %e, "Event handler failed");
                }
                Err(panic) => {
                    warn!(
                        event = %event,
                        panic = %panic_message(panic.as_ref()),
                        "Event handler panicked"
                    );
                }
            }
        }

        snapshot.len()
    }

    /// Serialize `payload` and publish it.
    pub fn publish_event<T: Serialize>(&self, event: &str, payload: &T) -> usize {
        match serde_json::to_value(payload) {
            Ok(value) => self.publish(event, &value),
            Err(e) => {
                warn!(event = %event, error = %e, "Event payload failed to serialize");
                0
            }
        }
    }

    /// Number of handlers currently registered for `event`.
    pub fn handler_count(&self, event: &str) -> usize {
        self.read_handlers().get(event).map_or(0, HashMap::len)
    }

    fn read_handlers(&self) -> std::sync::RwLockReadGuard<'_, HandlerMap> {
        // A panicking handler never holds the lock, so poisoning is benign.
        match self.inner.handlers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_handlers(&self) -> std::sync::RwLockWriteGuard<'_, HandlerMap> {
        match self.inner.handlers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let events: Vec<String> = self.read_handlers().keys().cloned().collect();
        f.debug_struct("EventBus").field("events", &events).finish()
    }
}

/// Capability to remove one handler registration.
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<Inner>,
    event: String,
    id: HandlerId,
}

impl Subscription {
    /// Id of the registration this subscription controls.
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Event name the handler is registered for.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove the handler. Safe to call more than once, and after the bus
    /// itself is gone.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.bus.upgrade() {
            if inner.remove(&self.event, self.id) {
                debug!(event = %self.event, "Handler unsubscribed");
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

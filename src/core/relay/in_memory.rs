//! Same-process event relay
//!
//! `InMemoryEventRelay` keeps subscriptions in a `DashMap` keyed by event name
//! and invokes every matching handler, in subscription order, from inside
//! `emit`. Each handler's error or panic is caught and logged on its own; the
//! remaining handlers still run and the emitter always sees success.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use tracing::{debug, error, warn};

use super::{EventHandler, EventRelay, QueueEvent, SubscriptionId};
use crate::types::LedgerError;

struct Subscription {
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
    once: bool,
}

/// Outcome of delivering one event to its subscribers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers invoked
    pub invoked: usize,

    /// Handlers that returned an error or panicked
    pub failed: usize,

    /// Failures that were not business rejections and are worth delivering again
    pub retryable: usize,
}

impl DispatchReport {
    /// Whether every handler either succeeded or rejected the event for a business reason
    pub fn is_settled(&self) -> bool {
        self.retryable == 0
    }
}

/// Same-process publish/subscribe relay
#[derive(Default)]
pub struct InMemoryEventRelay {
    subscriptions: DashMap<String, Vec<Subscription>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for InMemoryEventRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventRelay")
            .field("events", &self.subscriptions.len())
            .finish()
    }
}

impl InMemoryEventRelay {
    /// Create a relay without subscriptions
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribe(&self, name: &str, handler: Arc<dyn EventHandler>, once: bool) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.subscriptions
            .entry(name.to_string())
            .or_default()
            .push(Subscription { id, handler, once });
        id
    }

    /// Deliver an event to every current subscriber of its name
    ///
    /// One-time subscriptions are removed before their handler runs, so a
    /// handler that emits the same event again does not see itself.
    pub async fn dispatch(&self, event: &QueueEvent) -> DispatchReport {
        // snapshot under the map guard, invoke after releasing it
        let handlers: Vec<Arc<dyn EventHandler>> = match self.subscriptions.get_mut(&event.name) {
            Some(mut subscriptions) => {
                let handlers = subscriptions
                    .iter()
                    .map(|subscription| Arc::clone(&subscription.handler))
                    .collect();
                subscriptions.retain(|subscription| !subscription.once);
                handlers
            }
            None => Vec::new(),
        };

        if handlers.is_empty() {
            debug!(event = %event.name, event_id = %event.id, "No listeners for event");
            return DispatchReport::default();
        }

        let mut report = DispatchReport::default();
        for handler in handlers {
            report.invoked += 1;
            let outcome = AssertUnwindSafe(handler.handle(event)).catch_unwind().await;
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error,
                Err(_) => LedgerError::HandlerPanicked {
                    event: event.name.clone(),
                },
            };

            report.failed += 1;
            if error.is_business_rejection() {
                warn!(
                    event = %event.name,
                    event_id = %event.id,
                    error = %error,
                    "Event handler rejected event"
                );
            } else {
                report.retryable += 1;
                error!(
                    event = %event.name,
                    event_id = %event.id,
                    error = %error,
                    "Event handler failed"
                );
            }
        }

        report
    }
}

#[async_trait]
impl EventRelay for InMemoryEventRelay {
    async fn emit(&self, name: &str, payload: serde_json::Value) -> Result<(), LedgerError> {
        let event = QueueEvent::new(name, payload);
        self.dispatch(&event).await;
        Ok(())
    }

    fn on(&self, name: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.subscribe(name, handler, false)
    }

    fn once(&self, name: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.subscribe(name, handler, true)
    }

    fn off(&self, name: &str, id: SubscriptionId) -> bool {
        match self.subscriptions.get_mut(name) {
            Some(mut subscriptions) => {
                let before = subscriptions.len();
                subscriptions.retain(|subscription| subscription.id != id);
                subscriptions.len() != before
            }
            None => false,
        }
    }

    fn remove_all_listeners(&self, name: Option<&str>) {
        match name {
            Some(name) => {
                self.subscriptions.remove(name);
            }
            None => self.subscriptions.clear(),
        }
    }

    fn listener_count(&self, name: &str) -> usize {
        self.subscriptions
            .get(name)
            .map(|subscriptions| subscriptions.len())
            .unwrap_or(0)
    }
}

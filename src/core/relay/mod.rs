//! Event relay between initiate and proceed steps
//!
//! The relay decouples "a ledger entry was written" from "the entry gets
//! applied". Initiate use cases `emit` a named event; handlers registered with
//! `on`/`once` run the matching proceed step.
//!
//! # Implementations
//!
//! - [`InMemoryEventRelay`] - same-process, dispatches to handlers inside `emit`
//! - [`OutboxEventRelay`] - `emit` appends to an outbox; an [`OutboxWorker`]
//!   delivers pending entries at least once
//!
//! In both cases a failing handler never fails the emitter: the initiating
//! call succeeds once its `PENDING` entry is written, and completion is
//! observed later through the entry's status.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::types::{LedgerError, TicketOrderId, TransactionId};

pub mod in_memory;
pub mod outbox;

pub use in_memory::InMemoryEventRelay;
pub use outbox::{Outbox, OutboxEntry, OutboxEventRelay, OutboxWorker};

/// Event emitted once a recharge entry is written
pub const RECHARGE_INITIATED: &str = "transaction.recharge.initiated";

/// Event emitted once a refund entry is written
pub const REFUND_INITIATED: &str = "transaction.refund.initiated";

/// Handle returned by subscriptions, used to unsubscribe
pub type SubscriptionId = u64;

/// Payload of [`RECHARGE_INITIATED`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RechargeInitiated {
    /// The `PENDING` recharge entry
    pub transaction_id: TransactionId,
}

/// Payload of [`REFUND_INITIATED`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundInitiated {
    /// The `PENDING` refund entry
    pub transaction_id: TransactionId,

    /// The order being refunded
    pub ticket_order_id: TicketOrderId,
}

/// An event as delivered to handlers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEvent {
    /// Unique event id, stable across redeliveries
    pub id: Uuid,

    /// Event name
    pub name: String,

    /// JSON payload
    pub payload: serde_json::Value,

    /// Emission instant
    pub timestamp: DateTime<Utc>,
}

impl QueueEvent {
    /// Create an event stamped with the current time
    pub fn new(name: &str, payload: serde_json::Value) -> Self {
        QueueEvent {
            id: Uuid::new_v4(),
            name: name.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Decode the payload into a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, LedgerError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| LedgerError::invalid_event_payload(&self.name, &e))
    }
}

/// Encode a typed payload for [`EventRelay::emit`]
pub fn encode_payload<T: Serialize>(
    name: &str,
    payload: &T,
) -> Result<serde_json::Value, LedgerError> {
    serde_json::to_value(payload).map_err(|e| LedgerError::invalid_event_payload(name, &e))
}

/// A subscriber to relay events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one delivery of an event
    ///
    /// Errors are logged by the relay and never reach the emitter.
    async fn handle(&self, event: &QueueEvent) -> Result<(), LedgerError>;
}

/// Publish/subscribe interface between use cases
#[async_trait]
pub trait EventRelay: Send + Sync {
    /// Publish an event
    async fn emit(&self, name: &str, payload: serde_json::Value) -> Result<(), LedgerError>;

    /// Subscribe a handler to every future event with this name
    fn on(&self, name: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId;

    /// Subscribe a handler to the next event with this name only
    fn once(&self, name: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId;

    /// Remove one subscription; returns whether it existed
    fn off(&self, name: &str, id: SubscriptionId) -> bool;

    /// Remove every subscription for `name`, or for all names
    fn remove_all_listeners(&self, name: Option<&str>);

    /// Number of subscriptions for `name`
    fn listener_count(&self, name: &str) -> usize;
}

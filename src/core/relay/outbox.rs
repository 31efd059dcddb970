//! Outbox-backed event relay
//!
//! `OutboxEventRelay::emit` only appends the event to an [`Outbox`] and
//! returns. An [`OutboxWorker`] later reads undelivered entries in append
//! order, dispatches each one through an inner [`InMemoryEventRelay`] and then
//! settles it.
//!
//! # Delivery Guarantee
//!
//! An entry leaves the outbox only after dispatch returns, so a worker that
//! stops between the two redelivers the entry on its next pass. Consumers are
//! idempotent through the settlement compare-and-swap, which turns a second
//! delivery into a logged `TransactionAlreadyCompleted`.
//!
//! # Retries
//!
//! A delivery where every handler succeeded or returned a business rejection
//! is final and the entry is dropped. Any other failure (an integrity error, a
//! panic) keeps the entry pending for the next pass. After `max_attempts`
//! deliveries the entry is moved to the dead letters and logged at `error`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::in_memory::InMemoryEventRelay;
use super::{EventHandler, EventRelay, QueueEvent, SubscriptionId};
use crate::types::LedgerError;

/// Deliveries before an entry is dead-lettered, unless configured otherwise
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// One stored event
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    /// Position in append order
    pub sequence: u64,

    /// The stored event
    pub event: QueueEvent,

    /// Dispatch attempts so far
    pub attempts: u32,
}

/// Append-ordered event store
///
/// Only undelivered entries are kept; delivered ones are pruned and counted.
#[derive(Debug, Default)]
pub struct Outbox {
    pending: DashMap<u64, OutboxEntry>,
    dead_letters: DashMap<u64, OutboxEntry>,
    next_sequence: AtomicU64,
    delivered: AtomicU64,
}

impl Outbox {
    /// Create an empty outbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an event and return its sequence number
    pub fn append(&self, event: QueueEvent) -> u64 {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        self.pending.insert(
            sequence,
            OutboxEntry {
                sequence,
                event,
                attempts: 0,
            },
        );
        sequence
    }

    /// Up to `limit` undelivered entries with a sequence of at least `from`, oldest first
    pub fn pending(&self, from: u64, limit: usize) -> Vec<OutboxEntry> {
        let mut pending: Vec<OutboxEntry> = self
            .pending
            .iter()
            .filter(|entry| entry.sequence >= from)
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by_key(|entry| entry.sequence);
        pending.truncate(limit);
        pending
    }

    /// Count a dispatch attempt; returns the attempts so far, 0 if the entry is gone
    pub fn record_attempt(&self, sequence: u64) -> u32 {
        match self.pending.get_mut(&sequence) {
            Some(mut entry) => {
                entry.attempts += 1;
                entry.attempts
            }
            None => 0,
        }
    }

    /// Drop a delivered entry; returns false if it was not pending
    pub fn mark_delivered(&self, sequence: u64) -> bool {
        let removed = self.pending.remove(&sequence).is_some();
        if removed {
            self.delivered.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    /// Move an entry to the dead letters; returns false if it was not pending
    pub fn dead_letter(&self, sequence: u64) -> bool {
        match self.pending.remove(&sequence) {
            Some((sequence, entry)) => {
                self.dead_letters.insert(sequence, entry);
                true
            }
            None => false,
        }
    }

    /// Number of undelivered entries
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of entries delivered and pruned so far
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Entries that exhausted their attempts, oldest first
    pub fn dead_letters(&self) -> Vec<OutboxEntry> {
        let mut entries: Vec<OutboxEntry> = self
            .dead_letters
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.sequence);
        entries
    }

    /// Look up a pending or dead-lettered entry by sequence number
    pub fn get(&self, sequence: u64) -> Option<OutboxEntry> {
        self.pending
            .get(&sequence)
            .or_else(|| self.dead_letters.get(&sequence))
            .map(|entry| entry.value().clone())
    }
}

/// Relay whose `emit` defers delivery to an [`OutboxWorker`]
#[derive(Debug, Clone)]
pub struct OutboxEventRelay {
    outbox: Arc<Outbox>,
    dispatcher: Arc<InMemoryEventRelay>,
}

impl Default for OutboxEventRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboxEventRelay {
    /// Create a relay with an empty outbox
    pub fn new() -> Self {
        OutboxEventRelay {
            outbox: Arc::new(Outbox::new()),
            dispatcher: Arc::new(InMemoryEventRelay::new()),
        }
    }

    /// The backing outbox
    pub fn outbox(&self) -> Arc<Outbox> {
        Arc::clone(&self.outbox)
    }

    /// A worker that delivers this relay's outbox to its subscribers
    pub fn worker(
        &self,
        batch_size: usize,
        poll_interval: Duration,
        max_attempts: u32,
    ) -> OutboxWorker {
        OutboxWorker::new(
            Arc::clone(&self.outbox),
            Arc::clone(&self.dispatcher),
            batch_size,
            poll_interval,
        )
        .with_max_attempts(max_attempts)
    }
}

#[async_trait]
impl EventRelay for OutboxEventRelay {
    async fn emit(&self, name: &str, payload: serde_json::Value) -> Result<(), LedgerError> {
        let event = QueueEvent::new(name, payload);
        let event_id = event.id;
        let sequence = self.outbox.append(event);
        debug!(event = name, %event_id, sequence, "Event stored in outbox");
        Ok(())
    }

    fn on(&self, name: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.dispatcher.on(name, handler)
    }

    fn once(&self, name: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        self.dispatcher.once(name, handler)
    }

    fn off(&self, name: &str, id: SubscriptionId) -> bool {
        self.dispatcher.off(name, id)
    }

    fn remove_all_listeners(&self, name: Option<&str>) {
        self.dispatcher.remove_all_listeners(name)
    }

    fn listener_count(&self, name: &str) -> usize {
        self.dispatcher.listener_count(name)
    }
}

/// Background delivery of outbox entries
#[derive(Debug, Clone)]
pub struct OutboxWorker {
    outbox: Arc<Outbox>,
    dispatcher: Arc<InMemoryEventRelay>,
    batch_size: usize,
    poll_interval: Duration,
    max_attempts: u32,
}

impl OutboxWorker {
    /// Create a worker that dead-letters after [`DEFAULT_MAX_ATTEMPTS`]
    ///
    /// # Arguments
    ///
    /// * `outbox` - Source of pending entries
    /// * `dispatcher` - Subscriptions the entries are delivered to
    /// * `batch_size` - Entries read per pass (at least 1)
    /// * `poll_interval` - Pause between passes in [`OutboxWorker::run`]
    pub fn new(
        outbox: Arc<Outbox>,
        dispatcher: Arc<InMemoryEventRelay>,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        OutboxWorker {
            outbox,
            dispatcher,
            batch_size: batch_size.max(1),
            poll_interval,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Deliveries allowed per entry before it is dead-lettered (at least 1)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Attempt the oldest batch of pending entries
    ///
    /// Returns how many entries left the outbox, delivered or dead-lettered.
    pub async fn drain_once(&self) -> usize {
        let batch = self.outbox.pending(0, self.batch_size);
        self.deliver(batch).await
    }

    /// Attempt every pending entry once, including events emitted by handlers
    ///
    /// Entries that stay pending after a retryable failure are not attempted
    /// again until the next call. Returns how many entries left the outbox.
    pub async fn drain(&self) -> usize {
        let mut cursor = 0;
        let mut total = 0;
        loop {
            let batch = self.outbox.pending(cursor, self.batch_size);
            let Some(last) = batch.last() else {
                return total;
            };
            cursor = last.sequence + 1;
            total += self.deliver(batch).await;
        }
    }

    async fn deliver(&self, batch: Vec<OutboxEntry>) -> usize {
        let mut settled = 0;

        for entry in batch {
            let attempts = self.outbox.record_attempt(entry.sequence);
            let report = self.dispatcher.dispatch(&entry.event).await;

            if report.is_settled() {
                if self.outbox.mark_delivered(entry.sequence) {
                    settled += 1;
                }
                debug!(
                    event = %entry.event.name,
                    sequence = entry.sequence,
                    invoked = report.invoked,
                    failed = report.failed,
                    "Outbox entry delivered"
                );
            } else if attempts >= self.max_attempts {
                if self.outbox.dead_letter(entry.sequence) {
                    settled += 1;
                }
                error!(
                    event = %entry.event.name,
                    event_id = %entry.event.id,
                    sequence = entry.sequence,
                    attempts,
                    "Outbox entry dead-lettered"
                );
            } else {
                warn!(
                    event = %entry.event.name,
                    sequence = entry.sequence,
                    attempts,
                    max_attempts = self.max_attempts,
                    "Outbox delivery failed, will retry"
                );
            }
        }

        settled
    }

    /// Poll the outbox until `shutdown` changes to `true`
    ///
    /// Pending entries are attempted once more before returning.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            max_attempts = self.max_attempts,
            "Outbox worker started"
        );
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.drain().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.drain().await;
        info!(remaining = self.outbox.pending_count(), "Outbox worker stopped");
    }
}

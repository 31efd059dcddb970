//! Core traits for persistence, atomic settlement and time
//!
//! This module defines the narrow contracts the use cases consume. The
//! repositories mirror the external persistence collaborators; `LedgerStore`
//! adds the operations that must be applied as a single atomic unit.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::types::{
    LedgerError, MinorUnits, TicketOrder, TicketOrderId, Transaction, TransactionId, User, UserId,
};

/// Trait for reading and writing user balance accounts
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Get a user by ID
    async fn find_user(&self, id: &str) -> Result<Option<User>, LedgerError>;

    /// Replace a stored user with the given snapshot
    async fn update_user(&self, user: User) -> Result<User, LedgerError>;
}

/// Trait for reading and writing ticket orders
#[async_trait]
pub trait TicketOrderRepository: Send + Sync {
    /// Get a ticket order by ID
    async fn find_ticket_order(&self, id: &str) -> Result<Option<TicketOrder>, LedgerError>;

    /// Get all ticket orders of a user, newest first
    async fn find_ticket_orders_by_user(&self, user_id: &str)
        -> Result<Vec<TicketOrder>, LedgerError>;

    /// Replace a stored ticket order with the given snapshot
    async fn update_ticket_order(&self, order: TicketOrder) -> Result<TicketOrder, LedgerError>;
}

/// Trait for the append-mostly transaction ledger
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Get a ledger entry by ID
    async fn find_transaction(&self, id: TransactionId)
        -> Result<Option<Transaction>, LedgerError>;

    /// Get all ledger entries of a user, newest first
    async fn find_transactions_by_user(&self, user_id: &str)
        -> Result<Vec<Transaction>, LedgerError>;

    /// Append a new ledger entry
    async fn create_transaction(&self, tx: Transaction) -> Result<Transaction, LedgerError>;

    /// Replace a stored ledger entry with the given snapshot
    async fn update_transaction(&self, tx: Transaction) -> Result<Transaction, LedgerError>;
}

/// Balance credit that completes a `PENDING` ledger entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// Entry to complete
    pub transaction_id: TransactionId,

    /// User whose balance is credited
    pub user_id: UserId,

    /// Amount to credit
    pub credit: MinorUnits,

    /// Ticket order to mark refunded in the same unit, for refunds
    pub refund_order: Option<TicketOrderId>,
}

/// Everything a settlement wrote
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementReceipt {
    /// The entry, now `COMPLETED`
    pub transaction: Transaction,

    /// The credited user
    pub user: User,

    /// The refunded order, for refunds
    pub ticket_order: Option<TicketOrder>,
}

/// Everything a ticket purchase wrote
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseReceipt {
    /// The charged user
    pub user: User,

    /// The new order
    pub ticket_order: TicketOrder,

    /// The `COMPLETED` purchase entry
    pub transaction: Transaction,
}

/// Persistence with atomic multi-entity writes
///
/// Every method here either applies all of its writes or none of them, and
/// the status check on the ledger entry is part of the same unit. This is
/// what makes proceed handlers safe under duplicate or concurrent delivery.
#[async_trait]
pub trait LedgerStore: UserRepository + TicketOrderRepository + TransactionRepository {
    /// Complete a `PENDING` entry and credit the user
    ///
    /// # Returns
    ///
    /// * `Ok(SettlementReceipt)` - If the entry was `PENDING` and all writes applied
    /// * `Err(LedgerError::TransactionAlreadyCompleted)` / `Err(LedgerError::TransactionFailed)` -
    ///   If another delivery already moved the entry to a terminal state
    /// * `Err(LedgerError::TicketNotRefundable)` - If the refund order is already refunded
    /// * Lookup or overflow errors; nothing is written in any error case
    async fn settle(&self, settlement: Settlement) -> Result<SettlementReceipt, LedgerError>;

    /// Move a `PENDING` entry to `FAILED`
    async fn fail_transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError>;

    /// Charge a user, create the order and record the `COMPLETED` purchase entry
    async fn record_purchase(
        &self,
        order: TicketOrder,
        transaction: Transaction,
    ) -> Result<PurchaseReceipt, LedgerError>;
}

/// Source of the current instant
pub trait Clock: Send + Sync {
    /// The current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
///
/// Used by script replays and tests. Stored as epoch milliseconds so it can
/// be shared without a lock.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Create a clock stopped at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        ManualClock {
            millis: AtomicI64::new(now.timestamp_millis()),
        }
    }

    /// Move the clock to `now`
    pub fn set(&self, now: DateTime<Utc>) {
        self.millis.store(now.timestamp_millis(), Ordering::SeqCst);
    }

    /// Move the clock forward
    pub fn advance(&self, by: chrono::Duration) {
        self.millis
            .fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

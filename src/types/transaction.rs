//! Ledger entry types for the transit ledger
//!
//! This module defines the `Transaction` ledger entry together with its type
//! and status enums. A ledger entry records a single monetary movement on a
//! user's balance and is never deleted once written.
//!
//! # Lifecycle
//!
//! ```text
//! PENDING ──complete()──▶ COMPLETED
//!    │
//!    └──────fail()──────▶ FAILED
//! ```
//!
//! Both `COMPLETED` and `FAILED` are terminal. Every transition goes through
//! [`Transaction::complete`] or [`Transaction::fail`], which reject any attempt
//! to leave a terminal state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::LedgerError;

/// User identifier (owned by the external user/auth module)
pub type UserId = String;

/// Ticket catalogue identifier
pub type TicketId = String;

/// Ticket order identifier
pub type TicketOrderId = String;

/// Ledger entry identifier
pub type TransactionId = Uuid;

/// Amount in minor currency units (e.g. grosze)
pub type MinorUnits = u64;

/// Kind of monetary movement recorded by a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Money added to the balance from an external payment
    Recharge,

    /// Balance spent on a ticket order
    TicketPurchase,

    /// Part of a ticket order's value returned to the balance
    TicketRefund,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionType::Recharge => "RECHARGE",
            TransactionType::TicketPurchase => "TICKET_PURCHASE",
            TransactionType::TicketRefund => "TICKET_REFUND",
        };
        f.write_str(name)
    }
}

/// Processing state of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Written by an initiate step, waiting for its proceed step
    Pending,

    /// Applied to the balance; terminal
    Completed,

    /// Abandoned without touching the balance; terminal
    Failed,
}

impl TransactionStatus {
    /// Whether no further transition is allowed from this status
    pub fn is_terminal(self) -> bool {
        match self {
            TransactionStatus::Pending => false,
            TransactionStatus::Completed | TransactionStatus::Failed => true,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// A single ledger entry
///
/// Values are immutable snapshots: the transition methods return a new
/// `Transaction` and the caller is responsible for persisting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Unique ledger entry id
    pub id: TransactionId,

    /// Owner of the balance this entry moves money on
    pub user_id: UserId,

    /// Kind of movement
    #[serde(rename = "type")]
    pub tx_type: TransactionType,

    /// Amount in minor currency units
    pub amount: MinorUnits,

    /// Catalogue ticket for purchase and refund entries
    pub ticket_id: Option<TicketId>,

    /// Ticket order a purchase created or a refund returns
    ///
    /// Persisted so that a refund entry can be matched back to its order
    /// without relying on the event payload.
    pub ticket_order_id: Option<TicketOrderId>,

    /// Current processing state
    pub status: TransactionStatus,

    /// When the entry was written
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a new `PENDING` ledger entry with a fresh id
    ///
    /// # Arguments
    ///
    /// * `user_id` - Owner of the balance
    /// * `tx_type` - Kind of movement
    /// * `amount` - Amount in minor units
    /// * `created_at` - Creation instant, supplied by the caller's clock
    pub fn pending(
        user_id: impl Into<UserId>,
        tx_type: TransactionType,
        amount: MinorUnits,
        created_at: DateTime<Utc>,
    ) -> Self {
        Transaction {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            tx_type,
            amount,
            ticket_id: None,
            ticket_order_id: None,
            status: TransactionStatus::Pending,
            created_at,
        }
    }

    /// Attach the ticket and ticket order this entry relates to
    pub fn for_ticket_order(
        mut self,
        ticket_id: impl Into<TicketId>,
        ticket_order_id: impl Into<TicketOrderId>,
    ) -> Self {
        self.ticket_id = Some(ticket_id.into());
        self.ticket_order_id = Some(ticket_order_id.into());
        self
    }

    /// Check that the entry is still `PENDING`
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the entry may still transition
    /// * `Err(LedgerError::TransactionAlreadyCompleted)` - If the entry is `COMPLETED`
    /// * `Err(LedgerError::TransactionFailed)` - If the entry is `FAILED`
    pub fn ensure_pending(&self) -> Result<(), LedgerError> {
        match self.status {
            TransactionStatus::Pending => Ok(()),
            TransactionStatus::Completed => {
                Err(LedgerError::transaction_already_completed(self.id))
            }
            TransactionStatus::Failed => Err(LedgerError::transaction_failed(self.id)),
        }
    }

    /// Transition `PENDING → COMPLETED`
    pub fn complete(&self) -> Result<Transaction, LedgerError> {
        self.transition(TransactionStatus::Completed)
    }

    /// Transition `PENDING → FAILED`
    pub fn fail(&self) -> Result<Transaction, LedgerError> {
        self.transition(TransactionStatus::Failed)
    }

    fn transition(&self, to: TransactionStatus) -> Result<Transaction, LedgerError> {
        self.ensure_pending()?;
        Ok(Transaction {
            status: to,
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn pending_recharge() -> Transaction {
        Transaction::pending("user-1", TransactionType::Recharge, 5000, Utc::now())
    }

    #[test]
    fn test_pending_starts_without_ticket() {
        let tx = pending_recharge();

        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.amount, 5000);
        assert!(tx.ticket_id.is_none());
        assert!(tx.ticket_order_id.is_none());
    }

    #[test]
    fn test_for_ticket_order_sets_both_links() {
        let tx = Transaction::pending("user-1", TransactionType::TicketRefund, 300, Utc::now())
            .for_ticket_order("ticket-7", "order-9");

        assert_eq!(tx.ticket_id.as_deref(), Some("ticket-7"));
        assert_eq!(tx.ticket_order_id.as_deref(), Some("order-9"));
    }

    #[test]
    fn test_complete_keeps_identity_and_amount() {
        let tx = pending_recharge();
        let completed = tx.complete().unwrap();

        assert_eq!(completed.status, TransactionStatus::Completed);
        assert_eq!(completed.id, tx.id);
        assert_eq!(completed.amount, tx.amount);
        assert_eq!(completed.created_at, tx.created_at);
        // the original snapshot is untouched
        assert_eq!(tx.status, TransactionStatus::Pending);
    }

    #[rstest]
    #[case::complete_after_complete(TransactionStatus::Completed, true)]
    #[case::fail_after_complete(TransactionStatus::Completed, false)]
    #[case::complete_after_fail(TransactionStatus::Failed, true)]
    #[case::fail_after_fail(TransactionStatus::Failed, false)]
    fn test_terminal_states_reject_transitions(
        #[case] status: TransactionStatus,
        #[case] complete: bool,
    ) {
        let tx = Transaction {
            status,
            ..pending_recharge()
        };

        let result = if complete { tx.complete() } else { tx.fail() };

        match status {
            TransactionStatus::Completed => assert_eq!(
                result.unwrap_err(),
                LedgerError::transaction_already_completed(tx.id)
            ),
            TransactionStatus::Failed => {
                assert_eq!(result.unwrap_err(), LedgerError::transaction_failed(tx.id))
            }
            TransactionStatus::Pending => unreachable!(),
        }
    }

    #[rstest]
    #[case(TransactionStatus::Pending, false)]
    #[case(TransactionStatus::Completed, true)]
    #[case(TransactionStatus::Failed, true)]
    fn test_is_terminal(#[case] status: TransactionStatus, #[case] expected: bool) {
        assert_eq!(status.is_terminal(), expected);
    }

    #[test]
    fn test_serializes_with_wire_names() {
        let tx = Transaction::pending("user-1", TransactionType::TicketRefund, 300, Utc::now());
        let json = serde_json::to_value(&tx).unwrap();

        assert_eq!(json["type"], "TICKET_REFUND");
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["userId"], "user-1");
    }
}

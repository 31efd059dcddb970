//! Error types for the transit ledger
//!
//! This module defines every error the balance and refund use cases can raise.
//!
//! # Error Categories
//!
//! - **Lookup Errors**: user, ticket order or transaction not found
//! - **Business Rejections**: minimum recharge, insufficient balance, ticket not refundable
//! - **State Errors**: transaction already completed or failed
//! - **Integrity Errors**: wrong transaction type, mismatched ticket order, overflow
//! - **Relay Errors**: event payload or delivery problems
//!
//! Initiate use cases surface these to their caller. Proceed use cases run
//! from the event relay, where the error is only logged and the outcome is
//! observed later through the transaction status.

use thiserror::Error;

use super::transaction::{MinorUnits, TicketOrderId, TransactionId, TransactionType, UserId};

/// Main error type for the transit ledger
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// The referenced user does not exist
    #[error("User {user} not found")]
    UserNotFound {
        /// User id that was looked up
        user: UserId,
    },

    /// The referenced ticket order does not exist or belongs to someone else
    #[error("Ticket order {order} not found")]
    TicketOrderNotFound {
        /// Ticket order id that was looked up
        order: TicketOrderId,
    },

    /// The ticket order carries no price, so nothing can be refunded
    #[error("Ticket order {order} has no price information")]
    TicketOrderNoPrice {
        /// Ticket order id
        order: TicketOrderId,
    },

    /// The ticket order is outside the refund window or already refunded
    #[error("Ticket order {order} is not refundable")]
    TicketNotRefundable {
        /// Ticket order id
        order: TicketOrderId,
    },

    /// The ticket order's validity window is empty or inverted
    #[error("Ticket order {order} has an invalid validity window")]
    InvalidValidityWindow {
        /// Ticket order id
        order: TicketOrderId,
    },

    /// The balance does not cover a deduction
    #[error("Insufficient balance for user {user}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        /// User id
        user: UserId,
        /// Current balance
        balance: MinorUnits,
        /// Requested deduction
        requested: MinorUnits,
    },

    /// The referenced ledger entry does not exist
    #[error("Transaction {tx} not found")]
    TransactionNotFound {
        /// Transaction id that was looked up
        tx: TransactionId,
    },

    /// The ledger entry was already completed
    #[error("Transaction {tx} is already completed")]
    TransactionAlreadyCompleted {
        /// Transaction id
        tx: TransactionId,
    },

    /// The ledger entry already failed
    #[error("Transaction {tx} is failed")]
    TransactionFailed {
        /// Transaction id
        tx: TransactionId,
    },

    /// The recharge amount is below the configured minimum
    #[error("Minimum recharge amount is {minimum}, got {amount}")]
    MinimumRechargeAmount {
        /// Requested amount
        amount: MinorUnits,
        /// Configured minimum
        minimum: MinorUnits,
    },

    /// A proceed step received a ledger entry of the wrong type
    #[error("Transaction {tx} has type {actual}, expected {expected}")]
    UnexpectedTransactionType {
        /// Transaction id
        tx: TransactionId,
        /// Type the use case handles
        expected: TransactionType,
        /// Type found in storage
        actual: TransactionType,
    },

    /// A refund event names a different ticket order than the stored entry
    #[error("Transaction {tx} refunds ticket order {stored}, event referenced {referenced}")]
    TicketOrderMismatch {
        /// Transaction id
        tx: TransactionId,
        /// Ticket order linked on the stored entry
        stored: String,
        /// Ticket order named by the event
        referenced: TicketOrderId,
    },

    /// Arithmetic overflow would occur
    #[error("Arithmetic overflow in {operation} for user {user}")]
    ArithmeticOverflow {
        /// Operation that would overflow
        operation: String,
        /// User id
        user: UserId,
    },

    /// An entity with the same id already exists
    #[error("Duplicate {entity} {id}")]
    Duplicate {
        /// Entity kind
        entity: String,
        /// Conflicting id
        id: String,
    },

    /// An event payload could not be encoded or decoded
    #[error("Invalid payload for event '{event}': {message}")]
    InvalidEventPayload {
        /// Event name
        event: String,
        /// Serializer message
        message: String,
    },

    /// An event handler panicked
    #[error("Handler for event '{event}' panicked")]
    HandlerPanicked {
        /// Event name
        event: String,
    },
}

impl LedgerError {
    /// Create a UserNotFound error
    pub fn user_not_found(user: &str) -> Self {
        LedgerError::UserNotFound {
            user: user.to_string(),
        }
    }

    /// Create a TicketOrderNotFound error
    pub fn ticket_order_not_found(order: &str) -> Self {
        LedgerError::TicketOrderNotFound {
            order: order.to_string(),
        }
    }

    /// Create a TicketOrderNoPrice error
    pub fn ticket_order_no_price(order: &str) -> Self {
        LedgerError::TicketOrderNoPrice {
            order: order.to_string(),
        }
    }

    /// Create a TicketNotRefundable error
    pub fn ticket_not_refundable(order: &str) -> Self {
        LedgerError::TicketNotRefundable {
            order: order.to_string(),
        }
    }

    /// Create an InvalidValidityWindow error
    pub fn invalid_validity_window(order: &str) -> Self {
        LedgerError::InvalidValidityWindow {
            order: order.to_string(),
        }
    }

    /// Create an InsufficientBalance error
    pub fn insufficient_balance(user: &str, balance: MinorUnits, requested: MinorUnits) -> Self {
        LedgerError::InsufficientBalance {
            user: user.to_string(),
            balance,
            requested,
        }
    }

    /// Create a TransactionNotFound error
    pub fn transaction_not_found(tx: TransactionId) -> Self {
        LedgerError::TransactionNotFound { tx }
    }

    /// Create a TransactionAlreadyCompleted error
    pub fn transaction_already_completed(tx: TransactionId) -> Self {
        LedgerError::TransactionAlreadyCompleted { tx }
    }

    /// Create a TransactionFailed error
    pub fn transaction_failed(tx: TransactionId) -> Self {
        LedgerError::TransactionFailed { tx }
    }

    /// Create a MinimumRechargeAmount error
    pub fn minimum_recharge_amount(amount: MinorUnits, minimum: MinorUnits) -> Self {
        LedgerError::MinimumRechargeAmount { amount, minimum }
    }

    /// Create an UnexpectedTransactionType error
    pub fn unexpected_transaction_type(
        tx: TransactionId,
        expected: TransactionType,
        actual: TransactionType,
    ) -> Self {
        LedgerError::UnexpectedTransactionType {
            tx,
            expected,
            actual,
        }
    }

    /// Create a TicketOrderMismatch error
    pub fn ticket_order_mismatch(
        tx: TransactionId,
        stored: Option<&str>,
        referenced: &str,
    ) -> Self {
        LedgerError::TicketOrderMismatch {
            tx,
            stored: stored.unwrap_or("<none>").to_string(),
            referenced: referenced.to_string(),
        }
    }

    /// Create an ArithmeticOverflow error
    pub fn arithmetic_overflow(operation: &str, user: &str) -> Self {
        LedgerError::ArithmeticOverflow {
            operation: operation.to_string(),
            user: user.to_string(),
        }
    }

    /// Create a Duplicate error
    pub fn duplicate(entity: &str, id: impl ToString) -> Self {
        LedgerError::Duplicate {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// Create an InvalidEventPayload error
    pub fn invalid_event_payload(event: &str, error: &serde_json::Error) -> Self {
        LedgerError::InvalidEventPayload {
            event: event.to_string(),
            message: error.to_string(),
        }
    }

    /// Whether this error is a business rejection rather than an integrity problem
    ///
    /// Business rejections are logged at `warn`; everything else at `error`.
    pub fn is_business_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::UserNotFound { .. }
                | LedgerError::TicketOrderNotFound { .. }
                | LedgerError::TicketOrderNoPrice { .. }
                | LedgerError::TicketNotRefundable { .. }
                | LedgerError::InvalidValidityWindow { .. }
                | LedgerError::InsufficientBalance { .. }
                | LedgerError::TransactionAlreadyCompleted { .. }
                | LedgerError::TransactionFailed { .. }
                | LedgerError::MinimumRechargeAmount { .. }
        )
    }
}

//! Types module
//!
//! Contains core data structures used throughout the ledger.
//! This module organizes types into logical submodules:
//! - `account`: the user's balance account
//! - `transaction`: ledger entries and identifiers
//! - `ticket_order`: purchased tickets and their validity windows
//! - `error`: error types for the ledger
//! - `pagination`: page requests and paged results for history queries

pub mod account;
pub mod error;
pub mod pagination;
pub mod ticket_order;
pub mod transaction;

pub use account::User;
pub use error::LedgerError;
pub use pagination::{Paginated, Pagination};
pub use ticket_order::TicketOrder;
pub use transaction::{
    MinorUnits, TicketId, TicketOrderId, Transaction, TransactionId, TransactionStatus,
    TransactionType, UserId,
};

//! Transit Ledger Library
//! # Overview
//!
//! This library keeps a transit user's balance consistent with a durable
//! ledger of transactions, and decides how much of a ticket order is
//! refundable at a given instant.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (Transaction, User, TicketOrder, LedgerError)
//! - [`core`] - Business logic components:
//!   - [`core::refund_policy`] - Time-dependent refund eligibility and pricing
//!   - [`core::store`] - Concurrent storage with atomic settlement
//!   - [`core::relay`] - Event relay between initiate and proceed steps
//!   - [`core::recharge`], [`core::refund`], [`core::purchase`] - Use cases
//! - [`app`] - Composition root
//! - [`config`], [`telemetry`] - Configuration and logging
//! - [`cli`], [`io`] - Script replay surface
//!
//! # Two-Step Operations
//!
//! Recharges and refunds are initiated and completed separately:
//!
//! - **Initiate**: validate, write a `PENDING` ledger entry, emit an event
//! - **Proceed**: triggered by the event, apply the balance change and move
//!   the entry to `COMPLETED` (or `FAILED`) in one atomic settlement
//!
//! An initiate call succeeds once its entry is written. Its outcome is
//! observed later through the entry's status.
//!
//! # Invariants
//!
//! - A balance is never negative
//! - A ledger entry leaves `PENDING` at most once
//! - A refunded ticket order is never refunded again

// Module declarations
pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod io;
pub mod telemetry;
pub mod types;

pub use app::LedgerApp;
pub use config::{AppConfig, RelayMode};
pub use core::{InMemoryLedgerStore, RefundPolicy};
pub use io::{write_users_csv, Replayer};
pub use types::{
    LedgerError, MinorUnits, Paginated, Pagination, TicketOrder, Transaction, TransactionId,
    TransactionStatus, TransactionType, User, UserId,
};

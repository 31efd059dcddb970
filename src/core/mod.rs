//! Core business logic module
//!
//! This module contains the balance and refund components:
//! - `traits` - Repository, atomic settlement and clock contracts
//! - `store` - Concurrent in-memory storage implementing every contract
//! - `refund_policy` - Time-dependent refund eligibility and pricing
//! - `relay` - Event relay between initiate and proceed steps
//! - `recharge`, `refund`, `purchase` - Use cases that move money
//! - `history` - Read paths over a user's ledger and orders
//! - `listeners` - Binding of relay events to proceed use cases

pub mod history;
pub mod listeners;
pub mod purchase;
pub mod recharge;
pub mod refund;
pub mod refund_policy;
pub mod relay;
pub mod store;
pub mod traits;

#[cfg(test)]
pub(crate) mod fixtures;

pub use history::{AccountRecharge, LedgerHistory, TicketOrderView};
pub use listeners::QueueListeners;
pub use purchase::{PurchaseTicket, PurchaseTicketInput};
pub use recharge::{InitiateRecharge, ProceedRecharge, RechargeReceipt, MINIMUM_RECHARGE_AMOUNT};
pub use refund::{InitiateTicketRefund, ProceedTicketRefund};
pub use refund_policy::{RefundAssessment, RefundPolicy};
pub use relay::{EventRelay, InMemoryEventRelay, OutboxEventRelay, OutboxWorker};
pub use store::InMemoryLedgerStore;
pub use traits::{Clock, LedgerStore, ManualClock, SystemClock};

//! Ticket order types for the transit ledger

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::transaction::{MinorUnits, TicketId, TicketOrderId, UserId};

/// A purchased ticket with its validity window
///
/// Once `is_refunded` is set it is never cleared, which makes the order
/// permanently non-refundable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketOrder {
    /// Order id
    pub id: TicketOrderId,

    /// Buyer
    pub user_id: UserId,

    /// Catalogue ticket the order was made for
    pub ticket_id: TicketId,

    /// Ticket name copied from the catalogue at purchase time
    pub ticket_name: Option<String>,

    /// Start of validity
    pub valid_from: DateTime<Utc>,

    /// End of validity
    pub valid_to: DateTime<Utc>,

    /// Purchase instant
    pub ordered_at: DateTime<Utc>,

    /// Price paid in minor units, absent for legacy orders
    pub price: Option<MinorUnits>,

    /// Whether the order has already been refunded
    pub is_refunded: bool,
}

impl TicketOrder {
    /// Length of the validity window
    pub fn validity(&self) -> Duration {
        self.valid_to - self.valid_from
    }

    /// Return a refunded snapshot of this order
    pub fn mark_as_refunded(&self) -> TicketOrder {
        TicketOrder {
            is_refunded: true,
            ..self.clone()
        }
    }
}

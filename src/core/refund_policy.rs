//! Refund eligibility policy for ticket orders
//!
//! This module decides whether a ticket order can be returned at a given
//! instant and how much of its price goes back to the balance.
//!
//! # Rules
//!
//! - An order that was already refunded is never refundable again
//! - Orders whose validity window is shorter than the minimum (7 days) are not refundable
//! - Before the window starts the order is refundable for its full price
//! - After the window ends the order is not refundable
//! - Inside the window the order is refundable while less than 10% of it has elapsed,
//!   and the refund is the unused share of the price, rounded down
//!
//! All functions are pure functions of the order and `now`. They are evaluated
//! both when a refund is initiated and again when it is completed, because time
//! advances between the two.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::types::{MinorUnits, TicketOrder};

/// Minimum validity window for a refundable ticket, in days
pub const DEFAULT_MINIMUM_VALIDITY_DAYS: i64 = 7;

/// Elapsed share of the window (percent) from which a ticket stops being refundable
pub const DEFAULT_MAX_ELAPSED_PERCENTAGE: u32 = 10;

/// Snapshot of a ticket order's refund state at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundAssessment {
    /// Whether a refund may be initiated or completed now
    pub is_refundable: bool,

    /// Amount that would be returned now, in minor units
    pub refundable_price: MinorUnits,

    /// Share of the validity window that has elapsed, 0 to 100
    pub elapsed_percentage: Decimal,
}

/// Refund eligibility rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundPolicy {
    minimum_validity: Duration,
    max_elapsed_percentage: Decimal,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MINIMUM_VALIDITY_DAYS, DEFAULT_MAX_ELAPSED_PERCENTAGE)
    }
}

impl RefundPolicy {
    /// Create a policy with custom thresholds
    ///
    /// # Arguments
    ///
    /// * `minimum_validity_days` - Shortest validity window that can be refunded
    /// * `max_elapsed_percentage` - Exclusive upper bound on the elapsed share
    ///
    /// A day count too large to represent makes every order too short to refund.
    pub fn new(minimum_validity_days: i64, max_elapsed_percentage: u32) -> Self {
        RefundPolicy {
            minimum_validity: Duration::try_days(minimum_validity_days).unwrap_or(Duration::MAX),
            max_elapsed_percentage: Decimal::from(max_elapsed_percentage),
        }
    }

    /// Share of the validity window that has elapsed at `now`, in percent
    ///
    /// Returns 0 before the window starts and 100 after it ends. A window of
    /// zero length counts as fully elapsed once it is reached.
    pub fn elapsed_percentage(&self, order: &TicketOrder, now: DateTime<Utc>) -> Decimal {
        if now < order.valid_from {
            return Decimal::ZERO;
        }
        if now > order.valid_to {
            return Decimal::ONE_HUNDRED;
        }

        let total = order.validity().num_milliseconds();
        if total <= 0 {
            return Decimal::ONE_HUNDRED;
        }
        let elapsed = (now - order.valid_from).num_milliseconds();

        Decimal::from(elapsed) * Decimal::ONE_HUNDRED / Decimal::from(total)
    }

    /// Whether the order may be refunded at `now`
    pub fn is_refundable(&self, order: &TicketOrder, now: DateTime<Utc>) -> bool {
        if order.is_refunded {
            return false;
        }
        if order.validity() < self.minimum_validity {
            return false;
        }
        if now < order.valid_from {
            return true;
        }
        if now > order.valid_to {
            return false;
        }

        self.elapsed_percentage(order, now) < self.max_elapsed_percentage
    }

    /// Amount that would be returned for the order at `now`
    ///
    /// The full price before the window starts; otherwise the unused share of
    /// the price, `floor(price × remaining / total)`. Zero when the order has no
    /// price or is not refundable.
    pub fn refundable_price(&self, order: &TicketOrder, now: DateTime<Utc>) -> MinorUnits {
        let Some(price) = order.price else {
            return 0;
        };
        if !self.is_refundable(order, now) {
            return 0;
        }
        if now < order.valid_from {
            return price;
        }

        let total = order.validity().num_milliseconds();
        let remaining = (order.valid_to - now).num_milliseconds();
        if total <= 0 || remaining <= 0 {
            return 0;
        }

        // integer math keeps the floor exact
        let refundable = u128::from(price) * remaining as u128 / total as u128;
        MinorUnits::try_from(refundable).unwrap_or(price)
    }

    /// Evaluate every rule for the order at `now`
    pub fn assess(&self, order: &TicketOrder, now: DateTime<Utc>) -> RefundAssessment {
        RefundAssessment {
            is_refundable: self.is_refundable(order, now),
            refundable_price: self.refundable_price(order, now),
            elapsed_percentage: self.elapsed_percentage(order, now),
        }
    }
}

//! Shared builders for use case tests

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::relay::InMemoryEventRelay;
use super::store::InMemoryLedgerStore;
use super::traits::ManualClock;
use crate::types::{MinorUnits, TicketOrder, User};

pub(crate) fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
}

pub(crate) struct Harness {
    pub(crate) store: Arc<InMemoryLedgerStore>,
    pub(crate) relay: Arc<InMemoryEventRelay>,
    pub(crate) clock: Arc<ManualClock>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Harness {
            store: Arc::new(InMemoryLedgerStore::new()),
            relay: Arc::new(InMemoryEventRelay::new()),
            clock: Arc::new(ManualClock::new(start())),
        }
    }

    pub(crate) fn with_user(self, id: &str, balance: MinorUnits) -> Self {
        self.store.insert_user(User::new(id, balance)).unwrap();
        self
    }

    /// Seed an order whose window opens `starts_in` from the clock's start
    pub(crate) fn with_order(
        self,
        id: &str,
        user_id: &str,
        starts_in: Duration,
        validity: Duration,
        price: Option<MinorUnits>,
    ) -> Self {
        let valid_from = start() + starts_in;
        self.store
            .insert_ticket_order(TicketOrder {
                id: id.to_string(),
                user_id: user_id.to_string(),
                ticket_id: "weekly".to_string(),
                ticket_name: Some("Weekly pass".to_string()),
                valid_from,
                valid_to: valid_from + validity,
                ordered_at: start() - Duration::days(1),
                price,
                is_refunded: false,
            })
            .unwrap();
        self
    }
}

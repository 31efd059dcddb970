//! Ticket purchase use case
//!
//! Buying a ticket charges the balance, creates the ticket order and appends a
//! `COMPLETED` `TICKET_PURCHASE` ledger entry in one atomic write. There is no
//! asynchronous step: a purchase either happened entirely or not at all.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::traits::{Clock, LedgerStore, PurchaseReceipt};
use crate::types::{
    LedgerError, MinorUnits, TicketId, TicketOrder, TicketOrderId, Transaction, TransactionType,
    UserId,
};

/// A ticket purchase request
///
/// The ticket catalogue is external; the caller supplies the price and name
/// it resolved from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseTicketInput {
    /// Buyer
    pub user_id: UserId,

    /// Catalogue ticket
    pub ticket_id: TicketId,

    /// Catalogue name, copied onto the order
    pub ticket_name: Option<String>,

    /// Order id to use; a fresh one is generated when absent
    pub ticket_order_id: Option<TicketOrderId>,

    /// Price in minor units
    pub price: MinorUnits,

    /// Start of validity
    pub valid_from: DateTime<Utc>,

    /// End of validity
    pub valid_to: DateTime<Utc>,
}

/// Buy a ticket from the balance
#[derive(Clone)]
pub struct PurchaseTicket {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl PurchaseTicket {
    /// Create the use case
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        PurchaseTicket { store, clock }
    }

    /// Charge the user and record the order
    ///
    /// # Returns
    ///
    /// * `Ok(PurchaseReceipt)` - The charged user, new order and purchase entry
    /// * `Err(LedgerError::UserNotFound)` - If the user does not exist
    /// * `Err(LedgerError::InvalidValidityWindow)` - If `valid_to` is not after `valid_from`
    /// * `Err(LedgerError::InsufficientBalance)` - If the balance does not cover the price
    #[instrument(
        skip(self, input),
        fields(user_id = %input.user_id, ticket_id = %input.ticket_id, price = input.price)
    )]
    pub async fn execute(
        &self,
        input: PurchaseTicketInput,
    ) -> Result<PurchaseReceipt, LedgerError> {
        info!("Purchasing ticket");

        if self.store.find_user(&input.user_id).await?.is_none() {
            warn!("Purchase rejected: user not found");
            return Err(LedgerError::user_not_found(&input.user_id));
        }

        let order_id = input
            .ticket_order_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if input.valid_to <= input.valid_from {
            warn!(order_id = %order_id, "Purchase rejected: empty validity window");
            return Err(LedgerError::invalid_validity_window(&order_id));
        }

        let now = self.clock.now();
        let order = TicketOrder {
            id: order_id,
            user_id: input.user_id.clone(),
            ticket_id: input.ticket_id.clone(),
            ticket_name: input.ticket_name,
            valid_from: input.valid_from,
            valid_to: input.valid_to,
            ordered_at: now,
            price: Some(input.price),
            is_refunded: false,
        };
        let transaction =
            Transaction::pending(input.user_id, TransactionType::TicketPurchase, input.price, now)
                .for_ticket_order(input.ticket_id, order.id.as_str())
                .complete()?;

        let receipt = match self.store.record_purchase(order, transaction).await {
            Ok(receipt) => receipt,
            Err(error) => {
                warn!(error = %error, "Purchase rejected");
                return Err(error);
            }
        };

        info!(
            order_id = %receipt.ticket_order.id,
            transaction_id = %receipt.transaction.id,
            balance = receipt.user.balance,
            "Ticket purchased"
        );
        Ok(receipt)
    }
}

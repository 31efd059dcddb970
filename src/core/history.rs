//! Read paths for a user's ledger and ticket orders

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use super::refund_policy::{RefundAssessment, RefundPolicy};
use super::traits::{Clock, LedgerStore};
use crate::types::{
    LedgerError, MinorUnits, Paginated, Pagination, TicketOrder, Transaction, TransactionId,
    TransactionStatus, TransactionType,
};

/// A ticket order with its refund state at query time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketOrderView {
    /// The stored order
    #[serde(flatten)]
    pub order: TicketOrder,

    /// Refund policy evaluated at query time
    #[serde(flatten)]
    pub refund: RefundAssessment,
}

/// One balance recharge as shown in the user's recharge history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecharge {
    pub transaction_id: TransactionId,
    pub amount: MinorUnits,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Transaction> for AccountRecharge {
    fn from(tx: Transaction) -> Self {
        AccountRecharge {
            transaction_id: tx.id,
            amount: tx.amount,
            status: tx.status,
            created_at: tx.created_at,
        }
    }
}

/// Queries over a user's history
///
/// Every query fails with `UserNotFound` for an unknown user and returns
/// newest entries first.
#[derive(Clone)]
pub struct LedgerHistory {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    policy: RefundPolicy,
}

impl LedgerHistory {
    /// Create the query service
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, policy: RefundPolicy) -> Self {
        LedgerHistory {
            store,
            clock,
            policy,
        }
    }

    /// A page of the user's ledger entries of every type
    #[instrument(skip(self))]
    pub async fn transactions_for_user(
        &self,
        user_id: &str,
        pagination: Pagination,
    ) -> Result<Paginated<Transaction>, LedgerError> {
        self.ensure_user(user_id).await?;
        let transactions = self.store.find_transactions_by_user(user_id).await?;
        let page = Paginated::from_items(transactions, pagination);

        info!(total = page.total, page = page.page, "transaction history loaded");
        Ok(page)
    }

    /// A page of the user's `RECHARGE` entries, in any status
    #[instrument(skip(self))]
    pub async fn recharges_for_user(
        &self,
        user_id: &str,
        pagination: Pagination,
    ) -> Result<Paginated<AccountRecharge>, LedgerError> {
        self.ensure_user(user_id).await?;
        let recharges: Vec<Transaction> = self
            .store
            .find_transactions_by_user(user_id)
            .await?
            .into_iter()
            .filter(|tx| tx.tx_type == TransactionType::Recharge)
            .collect();
        let page = Paginated::from_items(recharges, pagination).map(AccountRecharge::from);

        info!(total = page.total, page = page.page, "recharge history loaded");
        Ok(page)
    }

    /// A page of the user's ticket orders, each with its current refund state
    #[instrument(skip(self))]
    pub async fn ticket_orders_for_user(
        &self,
        user_id: &str,
        pagination: Pagination,
    ) -> Result<Paginated<TicketOrderView>, LedgerError> {
        self.ensure_user(user_id).await?;
        let now = self.clock.now();
        let orders = self.store.find_ticket_orders_by_user(user_id).await?;

        // Assess only the orders on the requested page
        let page = Paginated::from_items(orders, pagination).map(|order| {
            let refund = self.policy.assess(&order, now);
            TicketOrderView { order, refund }
        });

        info!(total = page.total, page = page.page, "ticket order history loaded");
        Ok(page)
    }

    async fn ensure_user(&self, user_id: &str) -> Result<(), LedgerError> {
        match self.store.find_user(user_id).await? {
            Some(_) => Ok(()),
            None => Err(LedgerError::user_not_found(user_id)),
        }
    }
}

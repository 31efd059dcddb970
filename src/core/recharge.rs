//! Balance recharge use cases
//!
//! A recharge runs in two steps:
//!
//! 1. [`InitiateRecharge`] validates the request, writes a `PENDING` `RECHARGE`
//!    entry and emits [`RECHARGE_INITIATED`](super::relay::RECHARGE_INITIATED)
//! 2. [`ProceedRecharge`] runs from the relay, credits the balance and completes
//!    the entry in one atomic settlement
//!
//! The caller of step 1 gets the `PENDING` entry back immediately; whether the
//! credit was applied is observed later through the entry's status.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use super::relay::{encode_payload, EventRelay, RechargeInitiated, RECHARGE_INITIATED};
use super::traits::{Clock, LedgerStore, Settlement, SettlementReceipt};
use crate::types::{
    LedgerError, MinorUnits, Transaction, TransactionId, TransactionStatus, TransactionType,
};

/// Smallest accepted recharge, in minor units (50.00)
pub const MINIMUM_RECHARGE_AMOUNT: MinorUnits = 5000;

/// What the caller of [`InitiateRecharge`] gets back
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RechargeReceipt {
    /// The new ledger entry
    pub transaction_id: TransactionId,

    /// Requested amount
    pub amount: MinorUnits,

    /// Always `PENDING`; completion is asynchronous
    pub status: TransactionStatus,
}

/// Start a balance recharge
#[derive(Clone)]
pub struct InitiateRecharge {
    store: Arc<dyn LedgerStore>,
    relay: Arc<dyn EventRelay>,
    clock: Arc<dyn Clock>,
    minimum_amount: MinorUnits,
}

impl InitiateRecharge {
    /// Create the use case
    ///
    /// # Arguments
    ///
    /// * `store` - Ledger persistence
    /// * `relay` - Where `RECHARGE_INITIATED` is emitted
    /// * `clock` - Timestamps the new entry
    /// * `minimum_amount` - Smallest accepted amount
    pub fn new(
        store: Arc<dyn LedgerStore>,
        relay: Arc<dyn EventRelay>,
        clock: Arc<dyn Clock>,
        minimum_amount: MinorUnits,
    ) -> Self {
        InitiateRecharge {
            store,
            relay,
            clock,
            minimum_amount,
        }
    }

    /// Validate, write a `PENDING` recharge entry and emit its event
    ///
    /// # Returns
    ///
    /// * `Ok(RechargeReceipt)` - Once the entry is written
    /// * `Err(LedgerError::UserNotFound)` - If the user does not exist
    /// * `Err(LedgerError::MinimumRechargeAmount)` - If `amount` is below the minimum;
    ///   no entry is written
    #[instrument(skip(self))]
    pub async fn execute(
        &self,
        user_id: &str,
        amount: MinorUnits,
    ) -> Result<RechargeReceipt, LedgerError> {
        info!("Initiating balance recharge");

        if self.store.find_user(user_id).await?.is_none() {
            warn!("Recharge rejected: user not found");
            return Err(LedgerError::user_not_found(user_id));
        }

        if amount < self.minimum_amount {
            warn!(minimum = self.minimum_amount, "Recharge rejected: amount below minimum");
            return Err(LedgerError::minimum_recharge_amount(amount, self.minimum_amount));
        }

        let transaction = self
            .store
            .create_transaction(Transaction::pending(
                user_id,
                TransactionType::Recharge,
                amount,
                self.clock.now(),
            ))
            .await?;

        // the entry is written; a lost event leaves it PENDING rather than failing the call
        if let Err(error) = self.publish(&transaction).await {
            error!(
                transaction_id = %transaction.id,
                error = %error,
                "Could not emit recharge event; entry stays pending"
            );
        }

        info!(transaction_id = %transaction.id, "Balance recharge initiated");

        Ok(RechargeReceipt {
            transaction_id: transaction.id,
            amount: transaction.amount,
            status: transaction.status,
        })
    }

    async fn publish(&self, transaction: &Transaction) -> Result<(), LedgerError> {
        let payload = encode_payload(
            RECHARGE_INITIATED,
            &RechargeInitiated {
                transaction_id: transaction.id,
            },
        )?;
        self.relay.emit(RECHARGE_INITIATED, payload).await
    }
}

/// Apply a `PENDING` recharge to the balance
#[derive(Clone)]
pub struct ProceedRecharge {
    store: Arc<dyn LedgerStore>,
}

impl ProceedRecharge {
    /// Create the use case
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        ProceedRecharge { store }
    }

    /// Credit the user and complete the entry
    ///
    /// The status check is repeated inside the atomic settlement, so a
    /// duplicate or concurrent delivery credits at most once.
    ///
    /// # Returns
    ///
    /// * `Ok(SettlementReceipt)` - The completed entry and credited user
    /// * `Err(LedgerError::TransactionNotFound)` - If the entry does not exist
    /// * `Err(LedgerError::UnexpectedTransactionType)` - If the entry is not a recharge
    /// * `Err(LedgerError::TransactionAlreadyCompleted)` / `Err(LedgerError::TransactionFailed)` -
    ///   If the entry is already terminal
    /// * `Err(LedgerError::UserNotFound)` - If the user is gone; the entry stays `PENDING`
    #[instrument(skip(self))]
    pub async fn execute(
        &self,
        transaction_id: TransactionId,
    ) -> Result<SettlementReceipt, LedgerError> {
        info!("Processing balance recharge");

        let transaction = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| LedgerError::transaction_not_found(transaction_id))?;

        if transaction.tx_type != TransactionType::Recharge {
            return Err(LedgerError::unexpected_transaction_type(
                transaction_id,
                TransactionType::Recharge,
                transaction.tx_type,
            ));
        }
        transaction.ensure_pending()?;

        if self.store.find_user(&transaction.user_id).await?.is_none() {
            warn!(user_id = %transaction.user_id, "Recharge not applied: user not found");
            return Err(LedgerError::user_not_found(&transaction.user_id));
        }

        let receipt = self
            .store
            .settle(Settlement {
                transaction_id,
                user_id: transaction.user_id.clone(),
                credit: transaction.amount,
                refund_order: None,
            })
            .await?;

        info!(
            user_id = %receipt.user.id,
            amount = transaction.amount,
            balance = receipt.user.balance,
            "Balance recharge completed"
        );
        Ok(receipt)
    }
}

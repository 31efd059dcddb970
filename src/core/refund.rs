//! Ticket refund use cases
//!
//! A refund runs in two steps:
//!
//! 1. [`InitiateTicketRefund`] checks ownership and the refund policy, writes a
//!    `PENDING` `TICKET_REFUND` entry for the refundable price and emits
//!    [`REFUND_INITIATED`](super::relay::REFUND_INITIATED)
//! 2. [`ProceedTicketRefund`] runs from the relay, re-evaluates the policy at
//!    the current instant and either settles the refund or fails the entry
//!
//! The amount written in step 1 is what step 2 credits, even when the price
//! computed at completion time is lower.

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use super::refund_policy::RefundPolicy;
use super::relay::{encode_payload, EventRelay, RefundInitiated, REFUND_INITIATED};
use super::traits::{Clock, LedgerStore, Settlement, SettlementReceipt};
use crate::types::{LedgerError, Transaction, TransactionId, TransactionType};

/// Start a ticket order refund
#[derive(Clone)]
pub struct InitiateTicketRefund {
    store: Arc<dyn LedgerStore>,
    relay: Arc<dyn EventRelay>,
    clock: Arc<dyn Clock>,
    policy: RefundPolicy,
}

impl InitiateTicketRefund {
    /// Create the use case
    pub fn new(
        store: Arc<dyn LedgerStore>,
        relay: Arc<dyn EventRelay>,
        clock: Arc<dyn Clock>,
        policy: RefundPolicy,
    ) -> Self {
        InitiateTicketRefund {
            store,
            relay,
            clock,
            policy,
        }
    }

    /// Validate the order, write a `PENDING` refund entry and emit its event
    ///
    /// Checks run in order: user, order, ownership, price, refundability,
    /// positive refundable price. An order owned by someone else is reported
    /// as not found.
    ///
    /// # Returns
    ///
    /// * `Ok(Transaction)` - The `PENDING` refund entry
    /// * `Err(LedgerError::UserNotFound)` - If the user does not exist
    /// * `Err(LedgerError::TicketOrderNotFound)` - If the order does not exist or is not the user's
    /// * `Err(LedgerError::TicketOrderNoPrice)` - If the order carries no price
    /// * `Err(LedgerError::TicketNotRefundable)` - If the policy rejects the order now
    #[instrument(skip(self))]
    pub async fn execute(
        &self,
        user_id: &str,
        ticket_order_id: &str,
    ) -> Result<Transaction, LedgerError> {
        info!("Initiating ticket order refund");

        if self.store.find_user(user_id).await?.is_none() {
            warn!("Refund rejected: user not found");
            return Err(LedgerError::user_not_found(user_id));
        }

        let order = match self.store.find_ticket_order(ticket_order_id).await? {
            Some(order) if order.user_id == user_id => order,
            Some(order) => {
                warn!(
                    owner = %order.user_id,
                    "Refund rejected: ticket order belongs to another user"
                );
                return Err(LedgerError::ticket_order_not_found(ticket_order_id));
            }
            None => {
                warn!("Refund rejected: ticket order not found");
                return Err(LedgerError::ticket_order_not_found(ticket_order_id));
            }
        };

        if matches!(order.price, None | Some(0)) {
            warn!("Refund rejected: ticket order has no price");
            return Err(LedgerError::ticket_order_no_price(ticket_order_id));
        }

        let now = self.clock.now();
        let assessment = self.policy.assess(&order, now);
        if !assessment.is_refundable || assessment.refundable_price == 0 {
            warn!(
                elapsed_percentage = %assessment.elapsed_percentage,
                refundable_price = assessment.refundable_price,
                "Refund rejected: ticket order is not refundable"
            );
            return Err(LedgerError::ticket_not_refundable(ticket_order_id));
        }

        let transaction = self
            .store
            .create_transaction(
                Transaction::pending(
                    user_id,
                    TransactionType::TicketRefund,
                    assessment.refundable_price,
                    now,
                )
                .for_ticket_order(order.ticket_id.as_str(), order.id.as_str()),
            )
            .await?;

        if let Err(error) = self.publish(&transaction, &order.id).await {
            error!(
                transaction_id = %transaction.id,
                error = %error,
                "Could not emit refund event; entry stays pending"
            );
        }

        info!(
            transaction_id = %transaction.id,
            refund_amount = transaction.amount,
            elapsed_percentage = %assessment.elapsed_percentage,
            "Ticket order refund initiated"
        );
        Ok(transaction)
    }

    async fn publish(
        &self,
        transaction: &Transaction,
        ticket_order_id: &str,
    ) -> Result<(), LedgerError> {
        let payload = encode_payload(
            REFUND_INITIATED,
            &RefundInitiated {
                transaction_id: transaction.id,
                ticket_order_id: ticket_order_id.to_string(),
            },
        )?;
        self.relay.emit(REFUND_INITIATED, payload).await
    }
}

/// Complete or fail a `PENDING` refund
#[derive(Clone)]
pub struct ProceedTicketRefund {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    policy: RefundPolicy,
}

impl ProceedTicketRefund {
    /// Create the use case
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, policy: RefundPolicy) -> Self {
        ProceedTicketRefund {
            store,
            clock,
            policy,
        }
    }

    /// Re-check the refund and settle it
    ///
    /// Integrity problems (unknown entry, wrong type, mismatched order) and
    /// terminal entries are reported without touching the entry. A missing
    /// user or order, or an order that stopped being refundable, moves the
    /// entry to `FAILED` before the error is returned.
    #[instrument(skip(self))]
    pub async fn execute(
        &self,
        transaction_id: TransactionId,
        ticket_order_id: &str,
    ) -> Result<SettlementReceipt, LedgerError> {
        info!("Processing ticket refund");

        let transaction = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| LedgerError::transaction_not_found(transaction_id))?;

        if transaction.tx_type != TransactionType::TicketRefund {
            return Err(LedgerError::unexpected_transaction_type(
                transaction_id,
                TransactionType::TicketRefund,
                transaction.tx_type,
            ));
        }
        if transaction.ticket_order_id.as_deref() != Some(ticket_order_id) {
            return Err(LedgerError::ticket_order_mismatch(
                transaction_id,
                transaction.ticket_order_id.as_deref(),
                ticket_order_id,
            ));
        }
        transaction.ensure_pending()?;

        if self.store.find_user(&transaction.user_id).await?.is_none() {
            return self
                .reject(transaction_id, LedgerError::user_not_found(&transaction.user_id))
                .await;
        }

        let Some(order) = self.store.find_ticket_order(ticket_order_id).await? else {
            return self
                .reject(transaction_id, LedgerError::ticket_order_not_found(ticket_order_id))
                .await;
        };

        let assessment = self.policy.assess(&order, self.clock.now());
        if !assessment.is_refundable {
            warn!(
                elapsed_percentage = %assessment.elapsed_percentage,
                "Ticket order is no longer refundable"
            );
            return self
                .reject(transaction_id, LedgerError::ticket_not_refundable(ticket_order_id))
                .await;
        }
        if assessment.refundable_price != transaction.amount {
            warn!(
                transaction_amount = transaction.amount,
                current_refundable_price = assessment.refundable_price,
                "Refund amount differs from current refundable price, crediting initiated amount"
            );
        }

        let settlement = Settlement {
            transaction_id,
            user_id: transaction.user_id.clone(),
            credit: transaction.amount,
            refund_order: Some(ticket_order_id.to_string()),
        };
        let receipt = match self.store.settle(settlement).await {
            Ok(receipt) => receipt,
            // lost a race with a concurrent refund of the same order or a user removal
            Err(
                error @ (LedgerError::TicketNotRefundable { .. }
                | LedgerError::UserNotFound { .. }
                | LedgerError::TicketOrderNotFound { .. }),
            ) => return self.reject(transaction_id, error).await,
            Err(error) => return Err(error),
        };

        info!(
            user_id = %receipt.user.id,
            refund_amount = transaction.amount,
            balance = receipt.user.balance,
            "Ticket refund completed"
        );
        Ok(receipt)
    }

    /// Move the entry to `FAILED` and return `reason`
    async fn reject(
        &self,
        transaction_id: TransactionId,
        reason: LedgerError,
    ) -> Result<SettlementReceipt, LedgerError> {
        warn!(error = %reason, "Failing refund transaction");
        if let Err(fail_error) = self.store.fail_transaction(transaction_id).await {
            error!(error = %fail_error, "Could not mark refund transaction failed");
        }
        Err(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixtures::{start, Harness};
    use crate::core::relay::REFUND_INITIATED;
    use crate::core::store::InMemoryLedgerStore;
    use crate::core::traits::{
        PurchaseReceipt, TicketOrderRepository, TransactionRepository, UserRepository,
    };
    use crate::types::{MinorUnits, TicketOrder, TransactionStatus, User};
    use async_trait::async_trait;
    use chrono::Duration;
    use rstest::rstest;

    fn initiate(harness: &Harness) -> InitiateTicketRefund {
        InitiateTicketRefund::new(
            harness.store.clone(),
            harness.relay.clone(),
            harness.clock.clone(),
            RefundPolicy::default(),
        )
    }

    fn proceed(harness: &Harness) -> ProceedTicketRefund {
        ProceedTicketRefund::new(
            harness.store.clone(),
            harness.clock.clone(),
            RefundPolicy::default(),
        )
    }

    async fn state(harness: &Harness, tx: TransactionId) -> (MinorUnits, bool, TransactionStatus) {
        let user = harness.store.find_user("alice").await.unwrap().unwrap();
        let order = harness.store.find_ticket_order("order-1").await.unwrap().unwrap();
        let tx = harness.store.find_transaction(tx).await.unwrap().unwrap();
        (user.balance, order.is_refunded, tx.status)
    }

    fn weekly_order(harness: Harness, starts_in: Duration, price: Option<MinorUnits>) -> Harness {
        harness.with_order("order-1", "alice", starts_in, Duration::days(7), price)
    }

    fn alice_with_order(
        balance: MinorUnits,
        starts_in: Duration,
        price: Option<MinorUnits>,
    ) -> Harness {
        weekly_order(Harness::new().with_user("alice", balance), starts_in, price)
    }

    #[tokio::test]
    async fn test_initiate_future_order_refunds_full_price() {
        let harness = alice_with_order(0, Duration::days(2), Some(1000));

        let tx = initiate(&harness).execute("alice", "order-1").await.unwrap();

        assert_eq!(tx.amount, 1000);
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.tx_type, TransactionType::TicketRefund);
        assert_eq!(tx.ticket_id.as_deref(), Some("weekly"));
        assert_eq!(tx.ticket_order_id.as_deref(), Some("order-1"));
    }

    #[tokio::test]
    async fn test_initiate_partial_refund_uses_elapsed_share() {
        let harness = alice_with_order(0, Duration::zero(), Some(1000));
        harness.clock.advance(Duration::hours(12));

        let tx = initiate(&harness).execute("alice", "order-1").await.unwrap();

        assert_eq!(tx.amount, 928);
    }

    #[rstest]
    #[case::no_price(None, Duration::days(1), LedgerError::ticket_order_no_price("order-1"))]
    #[case::zero_price(Some(0), Duration::days(1), LedgerError::ticket_order_no_price("order-1"))]
    #[case::past_ten_percent(
        Some(1000),
        -Duration::days(1),
        LedgerError::ticket_not_refundable("order-1")
    )]
    #[tokio::test]
    async fn test_initiate_rejections(
        #[case] price: Option<MinorUnits>,
        #[case] starts_in: Duration,
        #[case] expected: LedgerError,
    ) {
        let harness = alice_with_order(0, starts_in, price);

        let result = initiate(&harness).execute("alice", "order-1").await;

        assert_eq!(result.unwrap_err(), expected);
        assert!(harness.store.all_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_initiate_hides_other_users_orders() {
        let harness = weekly_order(
            Harness::new().with_user("alice", 0).with_user("mallory", 0),
            Duration::days(1),
            Some(1000),
        );

        let result = initiate(&harness).execute("mallory", "order-1").await;

        assert_eq!(result.unwrap_err(), LedgerError::ticket_order_not_found("order-1"));
    }

    #[tokio::test]
    async fn test_initiate_unknown_user_and_order() {
        let harness = Harness::new().with_user("alice", 0);

        assert_eq!(
            initiate(&harness).execute("ghost", "order-1").await.unwrap_err(),
            LedgerError::user_not_found("ghost")
        );
        assert_eq!(
            initiate(&harness).execute("alice", "missing").await.unwrap_err(),
            LedgerError::ticket_order_not_found("missing")
        );
    }

    #[tokio::test]
    async fn test_proceed_settles_refund() {
        let harness = alice_with_order(200, Duration::days(1), Some(1000));
        let tx = initiate(&harness).execute("alice", "order-1").await.unwrap();

        let receipt = proceed(&harness).execute(tx.id, "order-1").await.unwrap();

        assert_eq!(receipt.user.balance, 1200);
        assert_eq!(state(&harness, tx.id).await, (1200, true, TransactionStatus::Completed));
    }

    #[tokio::test]
    async fn test_proceed_completed_entry_changes_nothing() {
        let harness = alice_with_order(0, Duration::days(1), Some(1000));
        let tx = initiate(&harness).execute("alice", "order-1").await.unwrap();
        proceed(&harness).execute(tx.id, "order-1").await.unwrap();

        let result = proceed(&harness).execute(tx.id, "order-1").await;

        assert_eq!(result.unwrap_err(), LedgerError::transaction_already_completed(tx.id));
        assert_eq!(state(&harness, tx.id).await, (1000, true, TransactionStatus::Completed));
    }

    #[tokio::test]
    async fn test_proceed_fails_entry_when_window_passed() {
        let harness = alice_with_order(0, Duration::zero(), Some(1000));
        let tx = initiate(&harness).execute("alice", "order-1").await.unwrap();
        harness.clock.advance(Duration::days(1));

        let result = proceed(&harness).execute(tx.id, "order-1").await;

        assert_eq!(result.unwrap_err(), LedgerError::ticket_not_refundable("order-1"));
        assert_eq!(state(&harness, tx.id).await, (0, false, TransactionStatus::Failed));
    }

    #[tokio::test]
    async fn test_proceed_credits_initiated_amount_when_price_dropped() {
        let harness = alice_with_order(0, Duration::zero(), Some(1000));
        harness.clock.advance(Duration::hours(1));
        let tx = initiate(&harness).execute("alice", "order-1").await.unwrap();
        harness.clock.advance(Duration::hours(11));

        let receipt = proceed(&harness).execute(tx.id, "order-1").await.unwrap();

        assert_eq!(receipt.user.balance, tx.amount);
        assert!(tx.amount > 928);
    }

    #[tokio::test]
    async fn test_proceed_rejects_mismatched_order_without_failing() {
        let harness = alice_with_order(0, Duration::days(1), Some(1000));
        let tx = initiate(&harness).execute("alice", "order-1").await.unwrap();

        let result = proceed(&harness).execute(tx.id, "order-2").await;

        assert_eq!(
            result.unwrap_err(),
            LedgerError::ticket_order_mismatch(tx.id, Some("order-1"), "order-2")
        );
        assert_eq!(state(&harness, tx.id).await, (0, false, TransactionStatus::Pending));
    }

    #[tokio::test]
    async fn test_proceed_rejects_recharge_entry() {
        let harness = alice_with_order(0, Duration::days(1), Some(1000));
        let recharge = harness
            .store
            .create_transaction(Transaction::pending(
                "alice",
                TransactionType::Recharge,
                5000,
                start(),
            ))
            .await
            .unwrap();

        let result = proceed(&harness).execute(recharge.id, "order-1").await;

        assert!(matches!(result, Err(LedgerError::UnexpectedTransactionType { .. })));
        assert_eq!(state(&harness, recharge.id).await, (0, false, TransactionStatus::Pending));
    }

    #[tokio::test]
    async fn test_second_refund_of_same_order_fails() {
        let harness = alice_with_order(0, Duration::days(1), Some(1000));
        let first = initiate(&harness).execute("alice", "order-1").await.unwrap();
        let second = initiate(&harness).execute("alice", "order-1").await.unwrap();

        proceed(&harness).execute(first.id, "order-1").await.unwrap();
        let result = proceed(&harness).execute(second.id, "order-1").await;

        assert_eq!(result.unwrap_err(), LedgerError::ticket_not_refundable("order-1"));
        assert_eq!(state(&harness, second.id).await, (1000, true, TransactionStatus::Failed));
    }

    #[tokio::test]
    async fn test_initiate_emits_refund_event() {
        use crate::core::relay::in_memory::tests::CountingHandler;

        let harness = alice_with_order(0, Duration::days(1), Some(1000));
        let handler = Arc::new(CountingHandler::default());
        harness.relay.on(REFUND_INITIATED, handler.clone());

        initiate(&harness).execute("alice", "order-1").await.unwrap();

        assert_eq!(handler.count(), 1);
    }

    #[tokio::test]
    async fn test_initiate_succeeds_when_emit_fails() {
        use crate::core::relay::in_memory::tests::UnavailableRelay;

        let harness = alice_with_order(0, Duration::days(1), Some(1000));
        let initiate = InitiateTicketRefund::new(
            harness.store.clone(),
            Arc::new(UnavailableRelay::default()),
            harness.clock.clone(),
            RefundPolicy::default(),
        );

        let tx = initiate.execute("alice", "order-1").await.unwrap();

        assert_eq!(state(&harness, tx.id).await, (0, false, TransactionStatus::Pending));
    }

    async fn pending_refund(harness: &Harness, user: &str, order: &str) -> Transaction {
        harness
            .store
            .create_transaction(
                Transaction::pending(user, TransactionType::TicketRefund, 1000, start())
                    .for_ticket_order("weekly", order),
            )
            .await
            .unwrap()
    }

    async fn status(harness: &Harness, tx: TransactionId) -> TransactionStatus {
        harness.store.find_transaction(tx).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_proceed_fails_entry_when_user_missing() {
        let harness = alice_with_order(0, Duration::days(1), Some(1000));
        let tx = pending_refund(&harness, "ghost", "order-1").await;

        let result = proceed(&harness).execute(tx.id, "order-1").await;

        assert_eq!(result.unwrap_err(), LedgerError::user_not_found("ghost"));
        assert_eq!(status(&harness, tx.id).await, TransactionStatus::Failed);
        let order = harness.store.find_ticket_order("order-1").await.unwrap().unwrap();
        assert!(!order.is_refunded);
    }

    #[tokio::test]
    async fn test_proceed_fails_entry_when_order_missing() {
        let harness = Harness::new().with_user("alice", 300);
        let tx = pending_refund(&harness, "alice", "order-9").await;

        let result = proceed(&harness).execute(tx.id, "order-9").await;

        assert_eq!(result.unwrap_err(), LedgerError::ticket_order_not_found("order-9"));
        assert_eq!(status(&harness, tx.id).await, TransactionStatus::Failed);
        let user = harness.store.find_user("alice").await.unwrap().unwrap();
        assert_eq!(user.balance, 300);
    }

    #[tokio::test]
    async fn test_proceed_failed_entry_changes_nothing() {
        let harness = alice_with_order(0, Duration::zero(), Some(1000));
        let tx = initiate(&harness).execute("alice", "order-1").await.unwrap();
        harness.clock.advance(Duration::days(1));
        proceed(&harness).execute(tx.id, "order-1").await.unwrap_err();
        harness.clock.set(start());

        // refundable again at this instant, but the entry is already terminal
        let result = proceed(&harness).execute(tx.id, "order-1").await;

        assert_eq!(result.unwrap_err(), LedgerError::transaction_failed(tx.id));
        assert_eq!(state(&harness, tx.id).await, (0, false, TransactionStatus::Failed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refunds_of_one_order_credit_once() {
        let harness = alice_with_order(0, Duration::days(1), Some(1000));
        let mut entries = Vec::new();
        for _ in 0..8 {
            entries.push(initiate(&harness).execute("alice", "order-1").await.unwrap());
        }

        let proceed = proceed(&harness);
        let handles: Vec<_> = entries
            .iter()
            .map(|tx| {
                let proceed = proceed.clone();
                let id = tx.id;
                tokio::spawn(async move { proceed.execute(id, "order-1").await })
            })
            .collect();
        let mut completed = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => completed += 1,
                Err(error) => assert_eq!(error, LedgerError::ticket_not_refundable("order-1")),
            }
        }

        assert_eq!(completed, 1);
        let statuses: Vec<TransactionStatus> = harness
            .store
            .all_transactions()
            .into_iter()
            .map(|tx| tx.status)
            .collect();
        assert_eq!(statuses.iter().filter(|s| **s == TransactionStatus::Completed).count(), 1);
        assert_eq!(statuses.iter().filter(|s| **s == TransactionStatus::Failed).count(), 7);
        let user = harness.store.find_user("alice").await.unwrap().unwrap();
        assert_eq!(user.balance, 1000);
    }

    /// Store that lets another refund of the same order land just before settling
    struct RefundedBeforeSettle {
        inner: Arc<InMemoryLedgerStore>,
    }

    #[async_trait]
    impl UserRepository for RefundedBeforeSettle {
        async fn find_user(&self, id: &str) -> Result<Option<User>, LedgerError> {
            self.inner.find_user(id).await
        }

        async fn update_user(&self, user: User) -> Result<User, LedgerError> {
            self.inner.update_user(user).await
        }
    }

    #[async_trait]
    impl TicketOrderRepository for RefundedBeforeSettle {
        async fn find_ticket_order(&self, id: &str) -> Result<Option<TicketOrder>, LedgerError> {
            self.inner.find_ticket_order(id).await
        }

        async fn find_ticket_orders_by_user(
            &self,
            user_id: &str,
        ) -> Result<Vec<TicketOrder>, LedgerError> {
            self.inner.find_ticket_orders_by_user(user_id).await
        }

        async fn update_ticket_order(
            &self,
            order: TicketOrder,
        ) -> Result<TicketOrder, LedgerError> {
            self.inner.update_ticket_order(order).await
        }
    }

    #[async_trait]
    impl TransactionRepository for RefundedBeforeSettle {
        async fn find_transaction(
            &self,
            id: TransactionId,
        ) -> Result<Option<Transaction>, LedgerError> {
            self.inner.find_transaction(id).await
        }

        async fn find_transactions_by_user(
            &self,
            user_id: &str,
        ) -> Result<Vec<Transaction>, LedgerError> {
            self.inner.find_transactions_by_user(user_id).await
        }

        async fn create_transaction(&self, tx: Transaction) -> Result<Transaction, LedgerError> {
            self.inner.create_transaction(tx).await
        }

        async fn update_transaction(&self, tx: Transaction) -> Result<Transaction, LedgerError> {
            self.inner.update_transaction(tx).await
        }
    }

    #[async_trait]
    impl LedgerStore for RefundedBeforeSettle {
        async fn settle(&self, settlement: Settlement) -> Result<SettlementReceipt, LedgerError> {
            if let Some(order_id) = &settlement.refund_order {
                if let Some(order) = self.inner.find_ticket_order(order_id).await? {
                    self.inner.update_ticket_order(order.mark_as_refunded()).await?;
                }
            }
            self.inner.settle(settlement).await
        }

        async fn fail_transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
            self.inner.fail_transaction(id).await
        }

        async fn record_purchase(
            &self,
            order: TicketOrder,
            transaction: Transaction,
        ) -> Result<PurchaseReceipt, LedgerError> {
            self.inner.record_purchase(order, transaction).await
        }
    }

    #[tokio::test]
    async fn test_proceed_fails_entry_when_settlement_loses_race() {
        let harness = alice_with_order(0, Duration::days(1), Some(1000));
        let tx = initiate(&harness).execute("alice", "order-1").await.unwrap();
        let store = Arc::new(RefundedBeforeSettle {
            inner: harness.store.clone(),
        });
        let proceed =
            ProceedTicketRefund::new(store, harness.clock.clone(), RefundPolicy::default());

        let result = proceed.execute(tx.id, "order-1").await;

        assert_eq!(result.unwrap_err(), LedgerError::ticket_not_refundable("order-1"));
        assert_eq!(state(&harness, tx.id).await, (0, true, TransactionStatus::Failed));
    }
}

//! Thread-safe in-memory ledger storage
//!
//! This module provides `InMemoryLedgerStore`, which keeps users, ticket orders
//! and ledger entries in concurrent maps and implements every repository trait
//! plus the atomic `LedgerStore` operations.
//!
//! # Design
//!
//! Each entity lives in its own `DashMap`, giving fine-grained locking per key.
//! Multi-entity writes (`settle`, `fail_transaction`, `record_purchase`) hold the
//! entry guards of every entity they touch while they check and write, so no
//! other task can observe or interleave with a half-applied unit.
//!
//! # Lock Ordering
//!
//! Guards are always taken in the order transactions → users → ticket orders,
//! and at most one key per map. This rules out lock cycles between concurrent
//! settlements and purchases.
//!
//! # Compare-And-Swap
//!
//! The status of the ledger entry is checked under its own entry guard and
//! only rewritten from `PENDING`. A duplicate or concurrent delivery of the same
//! event therefore sees the terminal status and is rejected without touching
//! any balance.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::traits::{
    LedgerStore, PurchaseReceipt, Settlement, SettlementReceipt, TicketOrderRepository,
    TransactionRepository, UserRepository,
};
use crate::types::{
    LedgerError, TicketOrder, TicketOrderId, Transaction, TransactionId, User, UserId,
};

/// Thread-safe storage for users, ticket orders and ledger entries
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    /// Balance accounts by user id
    users: DashMap<UserId, User>,

    /// Ticket orders by order id
    ticket_orders: DashMap<TicketOrderId, TicketOrder>,

    /// Ledger entries by transaction id
    transactions: DashMap<TransactionId, Transaction>,
}

impl InMemoryLedgerStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user account
    ///
    /// User records are owned by the external user module; this is how they
    /// enter the ledger's storage.
    ///
    /// # Returns
    ///
    /// * `Ok(User)` - The stored user
    /// * `Err(LedgerError::Duplicate)` - If a user with the same id exists
    pub fn insert_user(&self, user: User) -> Result<User, LedgerError> {
        match self.users.entry(user.id.clone()) {
            Entry::Occupied(_) => Err(LedgerError::duplicate("user", &user.id)),
            Entry::Vacant(slot) => {
                slot.insert(user.clone());
                Ok(user)
            }
        }
    }

    /// Seed a ticket order
    pub fn insert_ticket_order(&self, order: TicketOrder) -> Result<TicketOrder, LedgerError> {
        match self.ticket_orders.entry(order.id.clone()) {
            Entry::Occupied(_) => Err(LedgerError::duplicate("ticket order", &order.id)),
            Entry::Vacant(slot) => {
                slot.insert(order.clone());
                Ok(order)
            }
        }
    }

    /// All users, sorted by id
    pub fn all_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    /// All ledger entries in creation order
    pub fn all_transactions(&self) -> Vec<Transaction> {
        let mut transactions: Vec<Transaction> = self
            .transactions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        transactions.sort_by_key(|tx| tx.created_at);
        transactions
    }

    fn apply_settlement(&self, settlement: &Settlement) -> Result<SettlementReceipt, LedgerError> {
        let mut tx_entry = self
            .transactions
            .get_mut(&settlement.transaction_id)
            .ok_or_else(|| LedgerError::transaction_not_found(settlement.transaction_id))?;
        let completed = tx_entry.complete()?;

        let mut user_entry = self
            .users
            .get_mut(&settlement.user_id)
            .ok_or_else(|| LedgerError::user_not_found(&settlement.user_id))?;
        let credited = user_entry.add_balance(settlement.credit)?;

        let order_entry = match &settlement.refund_order {
            Some(order_id) => {
                let order_entry = self
                    .ticket_orders
                    .get_mut(order_id)
                    .ok_or_else(|| LedgerError::ticket_order_not_found(order_id))?;
                if order_entry.is_refunded {
                    return Err(LedgerError::ticket_not_refundable(order_id));
                }
                Some(order_entry)
            }
            None => None,
        };

        // every check passed; write all entities before releasing any guard
        *user_entry = credited.clone();
        let ticket_order = order_entry.map(|mut entry| {
            let refunded = entry.mark_as_refunded();
            *entry = refunded.clone();
            refunded
        });
        *tx_entry = completed.clone();

        Ok(SettlementReceipt {
            transaction: completed,
            user: credited,
            ticket_order,
        })
    }

    fn apply_failure(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        let mut tx_entry = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| LedgerError::transaction_not_found(id))?;
        let failed = tx_entry.fail()?;
        *tx_entry = failed.clone();
        Ok(failed)
    }

    fn apply_purchase(
        &self,
        order: TicketOrder,
        transaction: Transaction,
    ) -> Result<PurchaseReceipt, LedgerError> {
        let tx_slot = match self.transactions.entry(transaction.id) {
            Entry::Occupied(_) => return Err(LedgerError::duplicate("transaction", transaction.id)),
            Entry::Vacant(slot) => slot,
        };

        let mut user_entry = self
            .users
            .get_mut(&order.user_id)
            .ok_or_else(|| LedgerError::user_not_found(&order.user_id))?;
        let charged = user_entry.deduct_balance(transaction.amount)?;

        let order_slot = match self.ticket_orders.entry(order.id.clone()) {
            Entry::Occupied(_) => return Err(LedgerError::duplicate("ticket order", &order.id)),
            Entry::Vacant(slot) => slot,
        };

        *user_entry = charged.clone();
        order_slot.insert(order.clone());
        tx_slot.insert(transaction.clone());

        Ok(PurchaseReceipt {
            user: charged,
            ticket_order: order,
            transaction,
        })
    }
}

#[async_trait]
impl UserRepository for InMemoryLedgerStore {
    async fn find_user(&self, id: &str) -> Result<Option<User>, LedgerError> {
        Ok(self.users.get(id).map(|entry| entry.value().clone()))
    }

    async fn update_user(&self, user: User) -> Result<User, LedgerError> {
        let mut entry = self
            .users
            .get_mut(&user.id)
            .ok_or_else(|| LedgerError::user_not_found(&user.id))?;
        *entry = user.clone();
        Ok(user)
    }
}

#[async_trait]
impl TicketOrderRepository for InMemoryLedgerStore {
    async fn find_ticket_order(&self, id: &str) -> Result<Option<TicketOrder>, LedgerError> {
        Ok(self.ticket_orders.get(id).map(|entry| entry.value().clone()))
    }

    async fn find_ticket_orders_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<TicketOrder>, LedgerError> {
        let mut orders: Vec<TicketOrder> = self
            .ticket_orders
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by(|a, b| b.ordered_at.cmp(&a.ordered_at));
        Ok(orders)
    }

    async fn update_ticket_order(&self, order: TicketOrder) -> Result<TicketOrder, LedgerError> {
        let mut entry = self
            .ticket_orders
            .get_mut(&order.id)
            .ok_or_else(|| LedgerError::ticket_order_not_found(&order.id))?;
        *entry = order.clone();
        Ok(order)
    }
}

#[async_trait]
impl TransactionRepository for InMemoryLedgerStore {
    async fn find_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.transactions.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_transactions_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let mut transactions: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transactions)
    }

    async fn create_transaction(&self, tx: Transaction) -> Result<Transaction, LedgerError> {
        match self.transactions.entry(tx.id) {
            Entry::Occupied(_) => Err(LedgerError::duplicate("transaction", tx.id)),
            Entry::Vacant(slot) => {
                slot.insert(tx.clone());
                Ok(tx)
            }
        }
    }

    async fn update_transaction(&self, tx: Transaction) -> Result<Transaction, LedgerError> {
        let mut entry = self
            .transactions
            .get_mut(&tx.id)
            .ok_or_else(|| LedgerError::transaction_not_found(tx.id))?;
        // terminal entries keep their status
        if entry.status != tx.status {
            entry.ensure_pending()?;
        }
        *entry = tx.clone();
        Ok(tx)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn settle(&self, settlement: Settlement) -> Result<SettlementReceipt, LedgerError> {
        self.apply_settlement(&settlement)
    }

    async fn fail_transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.apply_failure(id)
    }

    async fn record_purchase(
        &self,
        order: TicketOrder,
        transaction: Transaction,
    ) -> Result<PurchaseReceipt, LedgerError> {
        self.apply_purchase(order, transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TransactionStatus, TransactionType};
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn store_with_user(balance: u64) -> InMemoryLedgerStore {
        let store = InMemoryLedgerStore::new();
        store.insert_user(User::new("alice", balance)).unwrap();
        store
    }

    fn order(id: &str) -> TicketOrder {
        let now = Utc::now();
        TicketOrder {
            id: id.to_string(),
            user_id: "alice".to_string(),
            ticket_id: "weekly".to_string(),
            ticket_name: None,
            valid_from: now + Duration::days(1),
            valid_to: now + Duration::days(8),
            ordered_at: now,
            price: Some(700),
            is_refunded: false,
        }
    }

    async fn pending(
        store: &InMemoryLedgerStore,
        tx_type: TransactionType,
        amount: u64,
    ) -> Transaction {
        store
            .create_transaction(Transaction::pending("alice", tx_type, amount, Utc::now()))
            .await
            .unwrap()
    }

    fn credit(tx: &Transaction, refund_order: Option<&str>) -> Settlement {
        Settlement {
            transaction_id: tx.id,
            user_id: tx.user_id.clone(),
            credit: tx.amount,
            refund_order: refund_order.map(str::to_string),
        }
    }

    #[test]
    fn test_insert_user_rejects_duplicates() {
        let store = store_with_user(0);

        let result = store.insert_user(User::new("alice", 10));

        assert_eq!(result.unwrap_err(), LedgerError::duplicate("user", "alice"));
    }

    #[tokio::test]
    async fn test_find_missing_entities() {
        let store = InMemoryLedgerStore::new();

        assert!(store.find_user("nobody").await.unwrap().is_none());
        assert!(store.find_ticket_order("nothing").await.unwrap().is_none());
        assert!(store
            .find_transaction(TransactionId::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_update_user_replaces_stored_user() {
        let store = store_with_user(100);

        let updated = store.update_user(User::new("alice", 250)).await.unwrap();

        assert_eq!(updated.balance, 250);
        assert_eq!(store.find_user("alice").await.unwrap().unwrap().balance, 250);
    }

    #[tokio::test]
    async fn test_update_unknown_user_fails() {
        let store = store_with_user(100);

        let result = store.update_user(User::new("bob", 250)).await;

        assert_eq!(result.unwrap_err(), LedgerError::user_not_found("bob"));
        assert!(store.find_user("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_ticket_order_replaces_stored_order() {
        let store = store_with_user(0);
        store.insert_ticket_order(order("order-1")).unwrap();

        let updated = store
            .update_ticket_order(order("order-1").mark_as_refunded())
            .await
            .unwrap();

        assert!(updated.is_refunded);
        let stored = store.find_ticket_order("order-1").await.unwrap().unwrap();
        assert!(stored.is_refunded);
    }

    #[tokio::test]
    async fn test_update_unknown_ticket_order_fails() {
        let store = store_with_user(0);

        let result = store.update_ticket_order(order("order-9")).await;

        assert_eq!(result.unwrap_err(), LedgerError::ticket_order_not_found("order-9"));
        assert!(store.find_ticket_order("order-9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settle_credits_and_completes() {
        let store = store_with_user(100);
        let tx = pending(&store, TransactionType::Recharge, 5000).await;

        let receipt = store.settle(credit(&tx, None)).await.unwrap();

        assert_eq!(receipt.user.balance, 5100);
        assert_eq!(receipt.transaction.status, TransactionStatus::Completed);
        assert!(receipt.ticket_order.is_none());
        assert_eq!(store.find_user("alice").await.unwrap().unwrap().balance, 5100);
    }

    #[tokio::test]
    async fn test_settle_twice_credits_once() {
        let store = store_with_user(0);
        let tx = pending(&store, TransactionType::Recharge, 5000).await;

        store.settle(credit(&tx, None)).await.unwrap();
        let second = store.settle(credit(&tx, None)).await;

        assert_eq!(
            second.unwrap_err(),
            LedgerError::transaction_already_completed(tx.id)
        );
        assert_eq!(store.find_user("alice").await.unwrap().unwrap().balance, 5000);
    }

    #[tokio::test]
    async fn test_settle_refund_marks_order() {
        let store = store_with_user(0);
        store.insert_ticket_order(order("order-1")).unwrap();
        let tx = pending(&store, TransactionType::TicketRefund, 700).await;

        let receipt = store.settle(credit(&tx, Some("order-1"))).await.unwrap();

        assert!(receipt.ticket_order.unwrap().is_refunded);
        let stored = store.find_ticket_order("order-1").await.unwrap().unwrap();
        assert!(stored.is_refunded);
    }

    #[tokio::test]
    async fn test_settle_writes_nothing_when_order_already_refunded() {
        let store = store_with_user(0);
        store
            .insert_ticket_order(order("order-1").mark_as_refunded())
            .unwrap();
        let tx = pending(&store, TransactionType::TicketRefund, 700).await;

        let result = store.settle(credit(&tx, Some("order-1"))).await;

        assert_eq!(
            result.unwrap_err(),
            LedgerError::ticket_not_refundable("order-1")
        );
        assert_eq!(store.find_user("alice").await.unwrap().unwrap().balance, 0);
        let stored = store.find_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_settle_writes_nothing_when_user_missing() {
        let store = InMemoryLedgerStore::new();
        let tx = pending(&store, TransactionType::Recharge, 5000).await;

        let result = store.settle(credit(&tx, None)).await;

        assert_eq!(result.unwrap_err(), LedgerError::user_not_found("alice"));
        let stored = store.find_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_fail_transaction_is_terminal() {
        let store = store_with_user(0);
        let tx = pending(&store, TransactionType::Recharge, 5000).await;

        let failed = store.fail_transaction(tx.id).await.unwrap();
        assert_eq!(failed.status, TransactionStatus::Failed);

        assert_eq!(
            store.fail_transaction(tx.id).await.unwrap_err(),
            LedgerError::transaction_failed(tx.id)
        );
        assert_eq!(
            store.settle(credit(&tx, None)).await.unwrap_err(),
            LedgerError::transaction_failed(tx.id)
        );
    }

    #[tokio::test]
    async fn test_update_transaction_cannot_leave_terminal_state() {
        let store = store_with_user(0);
        let tx = pending(&store, TransactionType::Recharge, 5000).await;
        store.settle(credit(&tx, None)).await.unwrap();

        let result = store.update_transaction(tx.clone()).await;

        assert_eq!(
            result.unwrap_err(),
            LedgerError::transaction_already_completed(tx.id)
        );
    }

    #[tokio::test]
    async fn test_record_purchase_applies_all_writes() {
        let store = store_with_user(10_000);
        let order = order("order-1");
        let tx = Transaction::pending("alice", TransactionType::TicketPurchase, 700, Utc::now())
            .for_ticket_order("weekly", "order-1")
            .complete()
            .unwrap();

        let receipt = store.record_purchase(order, tx.clone()).await.unwrap();

        assert_eq!(receipt.user.balance, 9_300);
        assert!(store.find_ticket_order("order-1").await.unwrap().is_some());
        assert_eq!(
            store.find_transaction(tx.id).await.unwrap().unwrap().status,
            TransactionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_record_purchase_insufficient_balance_writes_nothing() {
        let store = store_with_user(100);
        let tx = Transaction::pending("alice", TransactionType::TicketPurchase, 700, Utc::now())
            .complete()
            .unwrap();

        let result = store.record_purchase(order("order-1"), tx.clone()).await;

        assert_eq!(
            result.unwrap_err(),
            LedgerError::insufficient_balance("alice", 100, 700)
        );
        assert!(store.find_ticket_order("order-1").await.unwrap().is_none());
        assert!(store.find_transaction(tx.id).await.unwrap().is_none());
        assert_eq!(store.find_user("alice").await.unwrap().unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_history_is_newest_first() {
        let store = store_with_user(0);
        let older = store
            .create_transaction(Transaction::pending(
                "alice",
                TransactionType::Recharge,
                5000,
                Utc::now() - Duration::hours(1),
            ))
            .await
            .unwrap();
        let newer = pending(&store, TransactionType::Recharge, 6000).await;

        let history = store.find_transactions_by_user("alice").await.unwrap();

        assert_eq!(
            history.iter().map(|tx| tx.id).collect::<Vec<_>>(),
            vec![newer.id, older.id]
        );
        assert!(store.find_transactions_by_user("bob").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_settlements_apply_once() {
        let store = Arc::new(store_with_user(0));
        let tx = pending(&store, TransactionType::Recharge, 5000).await;

        let mut handles = vec![];
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let settlement = credit(&tx, None);
            handles.push(tokio::spawn(async move { store.settle(settlement).await }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(error) => {
                    assert_eq!(error, LedgerError::transaction_already_completed(tx.id))
                }
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(store.find_user("alice").await.unwrap().unwrap().balance, 5000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_settlements_on_different_transactions() {
        let store = Arc::new(store_with_user(0));
        let mut handles = vec![];
        for _ in 0..10 {
            let tx = pending(&store, TransactionType::Recharge, 5000).await;
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.settle(credit(&tx, None)).await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.find_user("alice").await.unwrap().unwrap().balance, 50_000);
    }
}

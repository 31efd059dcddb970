//! Composition root
//!
//! `LedgerApp` builds the store, the configured relay and every use case from
//! an [`AppConfig`], and registers the queue listeners once. Nothing else in
//! the crate constructs use cases with concrete implementations.
//!
//! ```text
//! LedgerApp
//!     ├── Arc<InMemoryLedgerStore>
//!     ├── Arc<dyn Clock>
//!     ├── Arc<dyn EventRelay>  (InMemoryEventRelay or OutboxEventRelay)
//!     ├── Option<OutboxWorker>
//!     └── use cases + QueueListeners
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{AppConfig, RelayMode};
use crate::core::{
    Clock, EventRelay, InMemoryEventRelay, InMemoryLedgerStore, InitiateRecharge,
    InitiateTicketRefund, LedgerHistory, OutboxEventRelay, OutboxWorker, ProceedRecharge,
    ProceedTicketRefund, PurchaseTicket, PurchaseTicketInput, QueueListeners, RechargeReceipt,
};
use crate::core::traits::PurchaseReceipt;
use crate::types::{LedgerError, MinorUnits, Transaction, User};

/// Fully wired ledger
pub struct LedgerApp {
    store: Arc<InMemoryLedgerStore>,
    relay: Arc<dyn EventRelay>,
    worker: Option<OutboxWorker>,
    listeners: QueueListeners,
    initiate_recharge: InitiateRecharge,
    initiate_refund: InitiateTicketRefund,
    purchase: PurchaseTicket,
    history: LedgerHistory,
}

impl LedgerApp {
    /// Wire every component and register the listeners
    pub fn new(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(InMemoryLedgerStore::new());
        let policy = config.refund.policy();

        let (relay, worker): (Arc<dyn EventRelay>, Option<OutboxWorker>) = match config.relay.mode {
            RelayMode::Inline => (Arc::new(InMemoryEventRelay::new()), None),
            RelayMode::Outbox => {
                let relay = OutboxEventRelay::new();
                let worker = relay.worker(
                    config.relay.batch_size,
                    config.relay.poll_interval(),
                    config.relay.max_attempts,
                );
                (Arc::new(relay), Some(worker))
            }
        };

        let listeners = QueueListeners::new(
            relay.clone(),
            ProceedRecharge::new(store.clone()),
            ProceedTicketRefund::new(store.clone(), clock.clone(), policy),
        );
        listeners.register();

        info!(
            relay = ?config.relay.mode,
            minimum_recharge_amount = config.ledger.minimum_recharge_amount,
            "Ledger initialised"
        );

        LedgerApp {
            initiate_recharge: InitiateRecharge::new(
                store.clone(),
                relay.clone(),
                clock.clone(),
                config.ledger.minimum_recharge_amount,
            ),
            initiate_refund: InitiateTicketRefund::new(
                store.clone(),
                relay.clone(),
                clock.clone(),
                policy,
            ),
            purchase: PurchaseTicket::new(store.clone(), clock.clone()),
            history: LedgerHistory::new(store.clone(), clock, policy),
            store,
            relay,
            worker,
            listeners,
        }
    }

    /// The backing store
    pub fn store(&self) -> &Arc<InMemoryLedgerStore> {
        &self.store
    }

    /// The configured relay
    pub fn relay(&self) -> &Arc<dyn EventRelay> {
        &self.relay
    }

    /// Register the queue listeners; a no-op after the first call
    pub fn register_listeners(&self) -> bool {
        self.listeners.register()
    }

    /// Seed a user account
    pub fn open_account(&self, user_id: &str, balance: MinorUnits) -> Result<User, LedgerError> {
        self.store.insert_user(User::new(user_id, balance))
    }

    /// Start a balance recharge
    pub async fn initiate_recharge(
        &self,
        user_id: &str,
        amount: MinorUnits,
    ) -> Result<RechargeReceipt, LedgerError> {
        self.initiate_recharge.execute(user_id, amount).await
    }

    /// Start a ticket order refund
    pub async fn initiate_refund(
        &self,
        user_id: &str,
        ticket_order_id: &str,
    ) -> Result<Transaction, LedgerError> {
        self.initiate_refund.execute(user_id, ticket_order_id).await
    }

    /// Buy a ticket from the balance
    pub async fn purchase_ticket(
        &self,
        input: PurchaseTicketInput,
    ) -> Result<PurchaseReceipt, LedgerError> {
        self.purchase.execute(input).await
    }

    /// History read paths
    pub fn history(&self) -> &LedgerHistory {
        &self.history
    }

    /// Attempt every pending outbox event once
    ///
    /// Returns how many events left the outbox; always 0 with the inline relay.
    pub async fn drain_outbox(&self) -> usize {
        match &self.worker {
            Some(worker) => worker.drain().await,
            None => 0,
        }
    }

    /// Run the outbox worker in the background until `shutdown` flips to `true`
    ///
    /// Returns `None` with the inline relay.
    pub fn spawn_outbox_worker(&self, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        self.worker
            .clone()
            .map(|worker| tokio::spawn(worker.run(shutdown)))
    }
}

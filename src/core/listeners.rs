//! Binding of relay events to proceed use cases
//!
//! [`QueueListeners::register`] subscribes one handler per transaction event.
//! Registration is guarded so that a second call on the same instance is a
//! no-op; otherwise every event would be processed twice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::recharge::ProceedRecharge;
use super::refund::ProceedTicketRefund;
use super::relay::{
    EventHandler, EventRelay, QueueEvent, RechargeInitiated, RefundInitiated, RECHARGE_INITIATED,
    REFUND_INITIATED,
};
use crate::types::LedgerError;

/// Runs [`ProceedRecharge`] for `RECHARGE_INITIATED`
pub struct RechargeInitiatedHandler {
    proceed: ProceedRecharge,
}

impl RechargeInitiatedHandler {
    pub fn new(proceed: ProceedRecharge) -> Self {
        RechargeInitiatedHandler { proceed }
    }
}

#[async_trait]
impl EventHandler for RechargeInitiatedHandler {
    async fn handle(&self, event: &QueueEvent) -> Result<(), LedgerError> {
        let payload: RechargeInitiated = event.decode()?;
        self.proceed.execute(payload.transaction_id).await?;
        Ok(())
    }
}

/// Runs [`ProceedTicketRefund`] for `REFUND_INITIATED`
pub struct RefundInitiatedHandler {
    proceed: ProceedTicketRefund,
}

impl RefundInitiatedHandler {
    pub fn new(proceed: ProceedTicketRefund) -> Self {
        RefundInitiatedHandler { proceed }
    }
}

#[async_trait]
impl EventHandler for RefundInitiatedHandler {
    async fn handle(&self, event: &QueueEvent) -> Result<(), LedgerError> {
        let payload: RefundInitiated = event.decode()?;
        self.proceed
            .execute(payload.transaction_id, &payload.ticket_order_id)
            .await?;
        Ok(())
    }
}

/// Registers the transaction-processing listeners exactly once
pub struct QueueListeners {
    relay: Arc<dyn EventRelay>,
    recharge: Arc<RechargeInitiatedHandler>,
    refund: Arc<RefundInitiatedHandler>,
    registered: AtomicBool,
}

impl QueueListeners {
    pub fn new(
        relay: Arc<dyn EventRelay>,
        recharge: ProceedRecharge,
        refund: ProceedTicketRefund,
    ) -> Self {
        QueueListeners {
            relay,
            recharge: Arc::new(RechargeInitiatedHandler::new(recharge)),
            refund: Arc::new(RefundInitiatedHandler::new(refund)),
            registered: AtomicBool::new(false),
        }
    }

    /// Subscribe the handlers; returns false if they were already registered
    pub fn register(&self) -> bool {
        if self.registered.swap(true, Ordering::SeqCst) {
            debug!("Queue listeners already registered");
            return false;
        }

        self.relay.on(RECHARGE_INITIATED, self.recharge.clone());
        self.relay.on(REFUND_INITIATED, self.refund.clone());
        info!("Queue listeners registered");
        true
    }

    /// Whether [`QueueListeners::register`] has run
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }
}

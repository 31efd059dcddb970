//! Script replay against a wired ledger
//!
//! `Replayer` feeds each `ScriptCommand` from a `ScriptReader` into a
//! [`LedgerApp`] driven by a [`ManualClock`], then summarises every user.
//!
//! # Error Handling
//!
//! Fatal errors (unreadable input, output write failures) are returned.
//! Malformed rows and rejected operations are logged at `warn` and skipped.
//!
//! # Determinism
//!
//! With the outbox relay the outbox is drained after every row, so a script
//! produces the same output whichever relay is configured.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::app::LedgerApp;
use crate::core::{ManualClock, PurchaseTicketInput};
use crate::io::csv_format::{write_users_csv, ScriptCommand, UserSummary};
use crate::io::script_reader::ScriptReader;
use crate::types::{LedgerError, TransactionStatus};

/// Counters for one replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Rows applied successfully
    pub applied: usize,

    /// Rows rejected by the ledger
    pub rejected: usize,

    /// Rows that could not be parsed
    pub malformed: usize,
}

/// Runs replay scripts
pub struct Replayer {
    app: LedgerApp,
    clock: Arc<ManualClock>,
}

impl Replayer {
    /// Create a replayer; `clock` must be the clock `app` was built with
    pub fn new(app: LedgerApp, clock: Arc<ManualClock>) -> Self {
        Replayer { app, clock }
    }

    /// The ledger being driven
    pub fn app(&self) -> &LedgerApp {
        &self.app
    }

    /// Replay a script file and write the user summaries to `output`
    pub async fn run(
        &self,
        input_path: &Path,
        output: &mut dyn Write,
    ) -> Result<ReplayStats, String> {
        let reader = ScriptReader::new(input_path)?;
        let mut stats = ReplayStats::default();

        for row in reader {
            match row {
                Ok(command) => match self.apply(command).await {
                    Ok(()) => stats.applied += 1,
                    Err(error) => {
                        warn!(error = %error, "Operation rejected");
                        stats.rejected += 1;
                    }
                },
                Err(error) => {
                    warn!(error = %error, "Skipping malformed row");
                    stats.malformed += 1;
                }
            }
            self.app.drain_outbox().await;
        }

        write_users_csv(&self.summaries(), output)?;

        info!(
            applied = stats.applied,
            rejected = stats.rejected,
            malformed = stats.malformed,
            "Replay finished"
        );
        Ok(stats)
    }

    /// Apply one command
    pub async fn apply(&self, command: ScriptCommand) -> Result<(), LedgerError> {
        match command {
            ScriptCommand::Open { user, balance } => {
                self.app.open_account(&user, balance)?;
            }
            ScriptCommand::Clock { at } => self.clock.set(at),
            ScriptCommand::Recharge { user, amount } => {
                self.app.initiate_recharge(&user, amount).await?;
            }
            ScriptCommand::Purchase {
                user,
                order,
                price,
                valid_from,
                valid_to,
            } => {
                self.app
                    .purchase_ticket(PurchaseTicketInput {
                        user_id: user,
                        ticket_id: order.clone(),
                        ticket_name: None,
                        ticket_order_id: Some(order),
                        price,
                        valid_from,
                        valid_to,
                    })
                    .await?;
            }
            ScriptCommand::Refund { user, order } => {
                self.app.initiate_refund(&user, &order).await?;
            }
        }
        Ok(())
    }

    /// Balance and ledger entry counts per user
    pub fn summaries(&self) -> Vec<UserSummary> {
        let mut counts: HashMap<String, (usize, usize, usize)> = HashMap::new();
        for tx in self.app.store().all_transactions() {
            let entry = counts.entry(tx.user_id).or_default();
            match tx.status {
                TransactionStatus::Pending => entry.0 += 1,
                TransactionStatus::Completed => entry.1 += 1,
                TransactionStatus::Failed => entry.2 += 1,
            }
        }

        self.app
            .store()
            .all_users()
            .into_iter()
            .map(|user| {
                let (pending, completed, failed) =
                    counts.get(&user.id).copied().unwrap_or_default();
                UserSummary {
                    user: user.id,
                    balance: user.balance,
                    pending,
                    completed,
                    failed,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, RelayConfig, RelayMode};
    use crate::core::Clock;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    fn replayer(mode: RelayMode) -> Replayer {
        let config = AppConfig {
            relay: RelayConfig {
                mode,
                ..Default::default()
            },
            ..Default::default()
        };
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
        ));
        Replayer::new(LedgerApp::new(&config, clock.clone()), clock)
    }

    #[rstest]
    #[case::inline(RelayMode::Inline)]
    #[case::outbox(RelayMode::Outbox)]
    #[tokio::test]
    async fn test_apply_and_summarise(#[case] mode: RelayMode) {
        let replayer = replayer(mode);

        replayer
            .apply(ScriptCommand::Open { user: "alice".to_string(), balance: 0 })
            .await
            .unwrap();
        replayer
            .apply(ScriptCommand::Recharge { user: "alice".to_string(), amount: 6000 })
            .await
            .unwrap();
        let rejected = replayer
            .apply(ScriptCommand::Recharge { user: "alice".to_string(), amount: 10 })
            .await;
        replayer.app().drain_outbox().await;

        assert_eq!(rejected.unwrap_err(), LedgerError::minimum_recharge_amount(10, 5000));
        assert_eq!(
            replayer.summaries(),
            vec![UserSummary {
                user: "alice".to_string(),
                balance: 6000,
                pending: 0,
                completed: 1,
                failed: 0,
            }]
        );
    }

    #[tokio::test]
    async fn test_clock_command_moves_clock() {
        let replayer = replayer(RelayMode::Inline);
        let at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();

        replayer.apply(ScriptCommand::Clock { at }).await.unwrap();

        assert_eq!(replayer.clock.now(), at);
    }
}

//! Transit Ledger CLI
//!
//! Replays a CSV script of balance and ticket operations and prints the final
//! state of every user.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- script.csv > users.csv
//! cargo run -- --relay outbox script.csv > users.csv
//! cargo run -- --config ledger.toml script.csv > users.csv
//! ```
//!
//! Logs are written to stderr; set `RUST_LOG` or `observability.log_level`
//! to change verbosity.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (bad configuration, file not found, file not readable, etc.)

use std::process;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use transit_ledger::cli;
use transit_ledger::core::ManualClock;
use transit_ledger::{telemetry, AppConfig, LedgerApp, Replayer};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = cli::parse_args();

    let config = AppConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    let config = args.apply_overrides(config);

    telemetry::init(&config.observability).context("failed to initialise logging")?;

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let replayer = Replayer::new(LedgerApp::new(&config, clock.clone()), clock);

    let mut output = std::io::stdout();
    replayer
        .run(&args.input_file, &mut output)
        .await
        .map_err(anyhow::Error::msg)?;

    Ok(())
}

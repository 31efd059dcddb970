use crate::config::{AppConfig, RelayMode};
use clap::Parser;
use std::path::PathBuf;

/// Replay balance and ticket operations against the transit ledger
#[derive(Parser, Debug)]
#[command(name = "transit-ledger")]
#[command(
    about = "Replay balance and ticket operations against the transit ledger",
    long_about = None
)]
pub struct CliArgs {
    /// Input CSV file path containing script operations
    #[arg(value_name = "INPUT", help = "Path to the input CSV script")]
    pub input_file: PathBuf,

    /// Optional TOML configuration file
    #[arg(
        long = "config",
        value_name = "FILE",
        help = "TOML configuration file (TRANSIT_* environment variables override it)"
    )]
    pub config: Option<PathBuf>,

    /// Event relay to use, overriding the configuration
    #[arg(
        long = "relay",
        value_name = "RELAY",
        help = "Event relay: 'inline' dispatches in-process, 'outbox' goes through an outbox worker"
    )]
    pub relay: Option<RelayMode>,
}

impl CliArgs {
    /// Apply command-line overrides to a loaded configuration
    pub fn apply_overrides(&self, mut config: AppConfig) -> AppConfig {
        if let Some(relay) = self.relay {
            config.relay.mode = relay;
        }
        config
    }
}

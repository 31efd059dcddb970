//! Layered configuration
//!
//! Sources, later ones overriding earlier ones:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. `TRANSIT_`-prefixed environment variables, with `__` between key
//!    segments (`TRANSIT_LEDGER__MINIMUM_RECHARGE_AMOUNT` -> `ledger.minimum_recharge_amount`)

use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::core::recharge::MINIMUM_RECHARGE_AMOUNT;
use crate::core::relay::outbox::DEFAULT_MAX_ATTEMPTS;
use crate::core::refund_policy::{
    RefundPolicy, DEFAULT_MAX_ELAPSED_PERCENTAGE, DEFAULT_MINIMUM_VALIDITY_DAYS,
};
use crate::types::MinorUnits;

/// Ledger rules
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub minimum_recharge_amount: MinorUnits,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            minimum_recharge_amount: MINIMUM_RECHARGE_AMOUNT,
        }
    }
}

/// Refund policy thresholds
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RefundConfig {
    pub minimum_validity_days: i64,
    pub max_elapsed_percentage: u32,
}

impl Default for RefundConfig {
    fn default() -> Self {
        Self {
            minimum_validity_days: DEFAULT_MINIMUM_VALIDITY_DAYS,
            max_elapsed_percentage: DEFAULT_MAX_ELAPSED_PERCENTAGE,
        }
    }
}

/// Longest minimum validity window accepted from configuration
pub const MAX_MINIMUM_VALIDITY_DAYS: i64 = 36_500;

impl RefundConfig {
    pub fn policy(&self) -> RefundPolicy {
        RefundPolicy::new(self.minimum_validity_days, self.max_elapsed_percentage)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_MINIMUM_VALIDITY_DAYS).contains(&self.minimum_validity_days) {
            return Err(ConfigError::Message(format!(
                "refund.minimum_validity_days must be between 1 and {}, got {}",
                MAX_MINIMUM_VALIDITY_DAYS, self.minimum_validity_days
            )));
        }
        if !(1..=100).contains(&self.max_elapsed_percentage) {
            return Err(ConfigError::Message(format!(
                "refund.max_elapsed_percentage must be between 1 and 100, got {}",
                self.max_elapsed_percentage
            )));
        }
        Ok(())
    }
}

/// How events travel from initiate to proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RelayMode {
    /// Handlers run inside `emit`
    #[default]
    Inline,
    /// `emit` writes to an outbox drained by a worker
    Outbox,
}

/// Event relay settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub mode: RelayMode,
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    /// Deliveries per outbox entry before it is dead-lettered
    pub max_attempts: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mode: RelayMode::Inline,
            poll_interval_ms: 100,
            batch_size: 64,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Message("relay.batch_size must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Message("relay.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// `pretty` (human readable) or `json` (structured)
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ledger: LedgerConfig,
    pub refund: RefundConfig,
    pub relay: RelayConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load defaults, then `file` if given, then the environment
    ///
    /// # Returns
    ///
    /// * `Ok(AppConfig)` - The merged configuration
    /// * `Err(ConfigError)` - If the file is missing or unreadable, a value has
    ///   the wrong type, or a value is out of range
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix("TRANSIT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the ledger cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.refund.validate()?;
        self.relay.validate()?;
        if !matches!(self.observability.log_format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Message(format!(
                "observability.log_format must be 'pretty' or 'json', got '{}'",
                self.observability.log_format
            )));
        }
        Ok(())
    }
}

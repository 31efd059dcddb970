//! CSV format handling for replay scripts and user summaries
//!
//! This module centralizes all CSV format concerns, providing:
//! - `ScriptRecord` structure for deserialization
//! - Conversion from script records to `ScriptCommand`s
//! - User summary output serialization
//!
//! All functions are pure (no I/O) for easy testing.

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::{MinorUnits, TicketOrderId, UserId};

/// Script record structure for deserialization
///
/// Matches the input CSV format with columns:
/// `op, user, amount, order, valid_from, valid_to, at`.
/// Every column except `op` is optional because each operation uses a
/// different subset of them.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct ScriptRecord {
    pub op: String,
    pub user: Option<String>,
    pub amount: Option<String>,
    pub order: Option<String>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
    pub at: Option<String>,
}

/// One replayable operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    /// Seed a user with an opening balance
    Open { user: UserId, balance: MinorUnits },

    /// Move the replay clock
    Clock { at: DateTime<Utc> },

    /// Initiate a balance recharge
    Recharge { user: UserId, amount: MinorUnits },

    /// Buy a ticket; the order id doubles as the ticket id
    Purchase {
        user: UserId,
        order: TicketOrderId,
        price: MinorUnits,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
    },

    /// Initiate a ticket order refund
    Refund { user: UserId, order: TicketOrderId },
}

/// Final state of one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    pub user: UserId,
    pub balance: MinorUnits,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required<'a>(value: &'a Option<String>, field: &str, op: &str) -> Result<&'a str, String> {
    present(value).ok_or_else(|| format!("'{}' operation requires '{}'", op, field))
}

fn parse_amount(value: &Option<String>, op: &str) -> Result<MinorUnits, String> {
    let raw = required(value, "amount", op)?;
    raw.parse::<MinorUnits>()
        .map_err(|_| format!("Invalid amount '{}' for '{}' operation", raw, op))
}

fn parse_instant(value: &Option<String>, field: &str, op: &str) -> Result<DateTime<Utc>, String> {
    let raw = required(value, field, op)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|_| format!("Invalid {} '{}' for '{}' operation", field, raw, op))
}

/// Convert a ScriptRecord to a ScriptCommand
///
/// # Arguments
///
/// * `record` - The deserialized CSV record
///
/// # Returns
///
/// Result containing either:
/// - Ok(ScriptCommand) - Successfully converted record
/// - Err(String) - Error message describing the conversion failure
pub fn convert_script_record(record: &ScriptRecord) -> Result<ScriptCommand, String> {
    let op = record.op.trim().to_lowercase();
    let user = |op: &str| required(&record.user, "user", op).map(str::to_string);

    match op.as_str() {
        "open" => Ok(ScriptCommand::Open {
            user: user(&op)?,
            balance: parse_amount(&record.amount, &op)?,
        }),
        "clock" => Ok(ScriptCommand::Clock {
            at: parse_instant(&record.at, "at", &op)?,
        }),
        "recharge" => Ok(ScriptCommand::Recharge {
            user: user(&op)?,
            amount: parse_amount(&record.amount, &op)?,
        }),
        "purchase" => Ok(ScriptCommand::Purchase {
            user: user(&op)?,
            order: required(&record.order, "order", &op)?.to_string(),
            price: parse_amount(&record.amount, &op)?,
            valid_from: parse_instant(&record.valid_from, "valid_from", &op)?,
            valid_to: parse_instant(&record.valid_to, "valid_to", &op)?,
        }),
        "refund" => Ok(ScriptCommand::Refund {
            user: user(&op)?,
            order: required(&record.order, "order", &op)?.to_string(),
        }),
        _ => Err(format!("Invalid operation: '{}'", record.op)),
    }
}

/// Write user summaries to CSV format
///
/// Writes rows with columns: user, balance, pending, completed, failed.
/// Rows are sorted by user id for deterministic output.
///
/// # Returns
///
/// * `Ok(())` if writing succeeded
/// * `Err(String)` if a write error occurred
pub fn write_users_csv(users: &[UserSummary], output: &mut dyn Write) -> Result<(), String> {
    use csv::Writer;

    let mut writer = Writer::from_writer(output);

    writer
        .write_record(["user", "balance", "pending", "completed", "failed"])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    let mut sorted = users.to_vec();
    sorted.sort_by(|a, b| a.user.cmp(&b.user));

    for summary in sorted {
        writer
            .write_record(&[
                summary.user,
                summary.balance.to_string(),
                summary.pending.to_string(),
                summary.completed.to_string(),
                summary.failed.to_string(),
            ])
            .map_err(|e| format!("Failed to write user record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))?;

    Ok(())
}

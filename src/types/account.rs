//! Balance account types for the transit ledger
//!
//! The balance lives on the `User` aggregate. The user record itself (names,
//! credentials, roles) belongs to the external auth module; this crate only
//! needs the id and the balance.

use serde::{Deserialize, Serialize};

use super::error::LedgerError;
use super::transaction::{MinorUnits, UserId};

/// A user's balance account
///
/// `balance` is never negative: it is an unsigned amount of minor units and
/// [`User::deduct_balance`] rejects any deduction larger than it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// The user id
    pub id: UserId,

    /// Current balance in minor currency units
    pub balance: MinorUnits,
}

impl User {
    /// Create a user snapshot with the given balance
    pub fn new(id: impl Into<UserId>, balance: MinorUnits) -> Self {
        User {
            id: id.into(),
            balance,
        }
    }

    /// Return a new snapshot with `amount` added to the balance
    ///
    /// # Returns
    ///
    /// * `Ok(User)` - The updated snapshot; the caller must persist it
    /// * `Err(LedgerError::ArithmeticOverflow)` - If the sum does not fit
    pub fn add_balance(&self, amount: MinorUnits) -> Result<User, LedgerError> {
        let balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::arithmetic_overflow("add_balance", &self.id))?;
        Ok(User {
            balance,
            ..self.clone()
        })
    }

    /// Return a new snapshot with `amount` removed from the balance
    ///
    /// # Returns
    ///
    /// * `Ok(User)` - The updated snapshot; the caller must persist it
    /// * `Err(LedgerError::InsufficientBalance)` - If `amount` exceeds the balance
    pub fn deduct_balance(&self, amount: MinorUnits) -> Result<User, LedgerError> {
        let balance = self.balance.checked_sub(amount).ok_or_else(|| {
            LedgerError::insufficient_balance(&self.id, self.balance, amount)
        })?;
        Ok(User {
            balance,
            ..self.clone()
        })
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Cents;

/// Identity-service assigned user id. Immutable once replicated.
pub type UserId = i64;

/// Why a balance change cannot be applied.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceError {
    #[error("balance would go negative")]
    Insufficient,

    #[error("balance would overflow")]
    Overflow,
}

/// The ledger's copy of a user: identity fields replicated from the identity
/// service plus the balance this service owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    /// Cents, never negative.
    pub balance: Cents,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A freshly replicated user always starts with an empty balance.
    pub fn replicated(id: UserId, email: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            email: email.into(),
            balance: 0,
            created_at,
        }
    }

    /// Balance after applying `delta`.
    pub fn balance_after(&self, delta: Cents) -> Result<Cents, BalanceError> {
        match self.balance.checked_add(delta) {
            None => Err(BalanceError::Overflow),
            Some(balance) if balance < 0 => Err(BalanceError::Insufficient),
            Some(balance) => Ok(balance),
        }
    }
}

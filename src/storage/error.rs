use thiserror::Error;

use crate::domain::UserId;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write (duplicate request id,
    /// user id or email).
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("User row missing: {0}")]
    UserMissing(UserId),

    #[error("Store error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }
}

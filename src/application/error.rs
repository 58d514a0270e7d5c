use std::time::Duration;

use thiserror::Error;

use crate::domain::{Cents, RequestId, UserId};
use crate::messaging::BusError;
use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// The request id was already applied; nothing was changed.
    #[error("Request already processed: {0}")]
    DuplicateRequest(RequestId),

    #[error("Insufficient funds for user {user_id}: balance {balance}, required {required}")]
    InsufficientFunds {
        user_id: UserId,
        balance: Cents,
        required: Cents,
    },

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Cannot transfer from user {0} to itself")]
    SameAccount(UserId),

    #[error("Invalid email: {0:?}")]
    InvalidEmail(String),

    #[error("Email already registered: {0}")]
    EmailAlreadyRegistered(String),

    #[error("Ledger rejected user replication: {0}")]
    ReplicationRejected(String),

    #[error("No reply on '{subject}' within {timeout:?}")]
    MessagingTimeout { subject: String, timeout: Duration },

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Messaging error: {0}")]
    Messaging(BusError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Database error: {0:#}")]
    Database(#[from] anyhow::Error),
}

impl LedgerError {
    pub fn user_not_found(id: UserId) -> Self {
        LedgerError::UserNotFound(id.to_string())
    }

    /// Whether the caller may safely retry with the same request id.
    /// A timeout is an unknown outcome, not a failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::MessagingTimeout { .. } | LedgerError::Store(StoreError::Backend(_))
        )
    }
}

impl From<BusError> for LedgerError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Timeout { subject, timeout } => {
                LedgerError::MessagingTimeout { subject, timeout }
            }
            other => LedgerError::Messaging(other),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::MalformedMessage(err.to_string())
    }
}

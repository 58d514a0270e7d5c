//! Wire format of the two bridge protocols.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::LedgerError;
use crate::domain::{Cents, UserId, format_cents, parse_cents};

/// Identity service → ledger: a user was created; reply is an [`Ack`].
pub const USER_CREATED_SUBJECT: &str = "user-created";

/// Identity service → ledger: payload is the raw email, reply is the balance
/// as a decimal string (or an error [`Ack`]).
pub const GET_BALANCE_SUBJECT: &str = "get-balance";

/// Replication event payload. `created_at` is RFC 3339 on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreated {
    pub id: UserId,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Success,
    Error,
}

/// `{status, message}` acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub status: AckStatus,
    pub message: String,
}

impl Ack {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: AckStatus::Error,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AckStatus::Success
    }
}

impl UserCreated {
    pub fn encode(&self) -> Result<Bytes, LedgerError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, LedgerError> {
        let event: UserCreated = serde_json::from_slice(payload)
            .map_err(|e| LedgerError::MalformedMessage(format!("user-created payload: {e}")))?;
        if event.email.trim().is_empty() {
            return Err(LedgerError::MalformedMessage(
                "user-created payload: empty email".to_string(),
            ));
        }
        Ok(event)
    }
}

impl Ack {
    pub fn encode(&self) -> Bytes {
        // An Ack is two plain strings; serialising it cannot fail.
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn decode(payload: &[u8]) -> Result<Self, LedgerError> {
        serde_json::from_slice(payload)
            .map_err(|e| LedgerError::MalformedMessage(format!("acknowledgement: {e}")))
    }
}

/// Parsed reply to a balance query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceReply {
    Balance(Cents),
    Error(String),
}

impl BalanceReply {
    pub fn encode(&self) -> Bytes {
        match self {
            BalanceReply::Balance(cents) => Bytes::from(format_cents(*cents)),
            BalanceReply::Error(message) => Ack::error(message.clone()).encode(),
        }
    }

    /// A decimal string is a balance; anything else must be an error ack.
    pub fn decode(payload: &[u8]) -> Result<Self, LedgerError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| LedgerError::MalformedMessage(format!("balance reply: {e}")))?;
        if let Ok(cents) = parse_cents(text) {
            return Ok(BalanceReply::Balance(cents));
        }
        let ack = Ack::decode(payload)
            .map_err(|_| LedgerError::MalformedMessage(format!("balance reply: {text:?}")))?;
        Ok(BalanceReply::Error(ack.message))
    }
}

/// Balance request payload: the email as raw UTF-8.
pub fn decode_email(payload: &[u8]) -> Result<String, LedgerError> {
    let email = std::str::from_utf8(payload)
        .map_err(|e| LedgerError::MalformedMessage(format!("get-balance payload: {e}")))?
        .trim();
    if email.is_empty() {
        return Err(LedgerError::MalformedMessage(
            "get-balance payload: empty email".to_string(),
        ));
    }
    Ok(email.to_string())
}

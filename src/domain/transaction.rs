use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, UserId};

/// Client-supplied idempotency key.
pub type RequestId = Uuid;

pub type TransactionId = i64;

/// Direction of a ledger row, always derived from the sign of its amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Credit,
    Debit,
}

impl TransactionKind {
    /// Positive amounts are credits, negative amounts debits. Zero moves no
    /// money and has no direction.
    pub fn from_amount(amount: Cents) -> Option<Self> {
        match amount {
            a if a > 0 => Some(TransactionKind::Credit),
            a if a < 0 => Some(TransactionKind::Debit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Credit => "credit",
            TransactionKind::Debit => "debit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "credit" => Some(TransactionKind::Credit),
            "debit" => Some(TransactionKind::Debit),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A committed ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Store-assigned sequence
    pub id: TransactionId,
    /// Owning user; `None` once the user row has been removed
    pub user_id: Option<UserId>,
    /// Signed cents: positive = credit, negative = debit
    pub amount: Cents,
    pub kind: TransactionKind,
    pub request_id: RequestId,
    pub created_at: DateTime<Utc>,
}

/// A ledger row about to be written. The kind is fixed at construction from
/// the amount's sign, so a row can never disagree with its own direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    user_id: UserId,
    amount: Cents,
    kind: TransactionKind,
    request_id: RequestId,
    created_at: DateTime<Utc>,
}

impl NewTransaction {
    /// Returns `None` for a zero amount.
    pub fn new(user_id: UserId, amount: Cents, request_id: RequestId) -> Option<Self> {
        let kind = TransactionKind::from_amount(amount)?;
        Some(Self {
            user_id,
            amount,
            kind,
            request_id,
            created_at: Utc::now(),
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn amount(&self) -> Cents {
        self.amount
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Materialise the row once the store has assigned its sequence id.
    pub fn into_transaction(self, id: TransactionId) -> Transaction {
        Transaction {
            id,
            user_id: Some(self.user_id),
            amount: self.amount,
            kind: self.kind,
            request_id: self.request_id,
            created_at: self.created_at,
        }
    }
}

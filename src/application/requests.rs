//! Request and response envelopes for whatever front end binds the ledger
//! operations (HTTP, RPC, CLI). Amounts travel as JSON numbers in currency
//! units and are converted to cents at the boundary.

use serde::{Deserialize, Serialize};

use crate::domain::{Cents, RequestId, UserId};
use crate::identity::{IdentityService, IdentityUser};

use super::{AddMoneyResult, LedgerError, TransactionProcessor, TransferResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMoneyRequest {
    pub user_id: UserId,
    pub amount: f64,
    pub request_id: RequestId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferMoneyRequest {
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub amount_to_transfer: f64,
    pub request_id: RequestId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddMoneyResponse {
    pub status: String,
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub status: String,
    pub balance: f64,
}

/// Convert a currency-unit amount to cents, rejecting anything that is not a
/// whole number of cents.
pub fn units_to_cents(amount: f64) -> Result<Cents, LedgerError> {
    if !amount.is_finite() {
        return Err(LedgerError::InvalidAmount(format!("{amount} is not a number")));
    }
    let scaled = amount * 100.0;
    let rounded = scaled.round();
    if (scaled - rounded).abs() > 1e-6 {
        return Err(LedgerError::InvalidAmount(format!(
            "{amount} has more than two decimal places"
        )));
    }
    if rounded.abs() >= i64::MAX as f64 {
        return Err(LedgerError::InvalidAmount(format!("{amount} is out of range")));
    }
    Ok(rounded as Cents)
}

pub fn cents_to_units(cents: Cents) -> f64 {
    cents as f64 / 100.0
}

impl AddMoneyRequest {
    pub async fn execute(&self, processor: &TransactionProcessor) -> Result<AddMoneyResult, LedgerError> {
        let amount = units_to_cents(self.amount)?;
        processor.add_money(self.user_id, amount, self.request_id).await
    }
}

impl TransferMoneyRequest {
    pub async fn execute(&self, processor: &TransactionProcessor) -> Result<TransferResult, LedgerError> {
        let amount = units_to_cents(self.amount_to_transfer)?;
        processor
            .transfer_money(self.from_user_id, self.to_user_id, amount, self.request_id)
            .await
    }
}

impl CreateUserRequest {
    pub async fn execute(&self, identity: &IdentityService) -> Result<IdentityUser, LedgerError> {
        identity.create_user(&self.email).await
    }
}

impl BalanceResponse {
    pub fn new(balance: Cents) -> Self {
        Self {
            status: "success".to_string(),
            balance: cents_to_units(balance),
        }
    }
}

impl From<&AddMoneyResult> for AddMoneyResponse {
    fn from(result: &AddMoneyResult) -> Self {
        Self {
            status: "success".to_string(),
            balance: cents_to_units(result.new_balance()),
        }
    }
}

impl From<&TransferResult> for StatusResponse {
    fn from(_: &TransferResult) -> Self {
        Self {
            status: "success".to_string(),
            message: "Money transferred successfully".to_string(),
        }
    }
}

impl From<&LedgerError> for StatusResponse {
    fn from(err: &LedgerError) -> Self {
        Self {
            status: "error".to_string(),
            message: err.to_string(),
        }
    }
}

impl LedgerError {
    /// HTTP status a front end should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::DuplicateRequest(_) | LedgerError::EmailAlreadyRegistered(_) => 409,
            LedgerError::InsufficientFunds { .. } => 422,
            LedgerError::UserNotFound(_) => 404,
            LedgerError::InvalidAmount(_)
            | LedgerError::SameAccount(_)
            | LedgerError::InvalidEmail(_) => 400,
            LedgerError::MessagingTimeout { .. } => 504,
            LedgerError::ReplicationRejected(_)
            | LedgerError::MalformedMessage(_)
            | LedgerError::Messaging(_) => 502,
            LedgerError::Store(_) | LedgerError::Database(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_to_cents() {
        assert_eq!(units_to_cents(50.0).unwrap(), 5000);
        assert_eq!(units_to_cents(0.1).unwrap(), 10);
        assert_eq!(units_to_cents(19.99).unwrap(), 1999);
        assert_eq!(units_to_cents(-30.0).unwrap(), -3000);
        assert!(units_to_cents(1.005).is_err());
        assert!(units_to_cents(f64::NAN).is_err());
        assert!(units_to_cents(f64::INFINITY).is_err());
    }

    #[test]
    fn test_request_wire_shape() {
        let json = r#"{
            "from_user_id": 1,
            "to_user_id": 2,
            "amount_to_transfer": 30.0,
            "request_id": "6f1c3b7e-8d4a-4b1e-9a53-2f0e5c7d9b10"
        }"#;
        let request: TransferMoneyRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.to_user_id, 2);
        assert_eq!(units_to_cents(request.amount_to_transfer).unwrap(), 3000);
    }

    #[test]
    fn test_error_envelope() {
        let err = LedgerError::user_not_found(5);
        let envelope = StatusResponse::from(&err);

        assert_eq!(envelope.status, "error");
        assert_eq!(envelope.message, "User not found: 5");
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn test_balance_response_in_units() {
        let response = BalanceResponse::new(12050);
        assert_eq!(response.status, "success");
        assert_eq!(response.balance, 120.5);
    }
}

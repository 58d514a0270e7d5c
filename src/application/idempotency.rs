use tracing::debug;

use crate::domain::{NewTransaction, RequestId, Transaction};
use crate::storage::{LedgerScope, StoreError};

use super::LedgerError;

/// Gatekeeper for client request ids.
///
/// `check` runs inside the mutation's scope before anything is written;
/// `record` writes a ledger row and turns the store's uniqueness rejection
/// into [`LedgerError::DuplicateRequest`]. The uniqueness constraint, not the
/// check, is what stops two concurrent requests with the same id.
pub struct IdempotencyGuard;

impl IdempotencyGuard {
    pub async fn check(
        scope: &mut dyn LedgerScope,
        request_id: RequestId,
    ) -> Result<(), LedgerError> {
        if scope.request_seen(request_id).await? {
            debug!(%request_id, "request id already applied");
            return Err(LedgerError::DuplicateRequest(request_id));
        }
        Ok(())
    }

    pub async fn record(
        scope: &mut dyn LedgerScope,
        row: NewTransaction,
    ) -> Result<Transaction, LedgerError> {
        let request_id = row.request_id();
        scope.insert_transaction(row).await.map_err(|e| match e {
            StoreError::UniqueViolation(_) => LedgerError::DuplicateRequest(request_id),
            other => LedgerError::Store(other),
        })
    }
}

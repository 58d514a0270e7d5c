use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::domain::{
    BalanceError, Cents, ConsistencyReport, NewTransaction, RequestId, Transaction, User, UserId,
    check_consistency,
};
use crate::storage::{LedgerScope, LedgerStore};

use super::{IdempotencyGuard, LedgerError};

/// Result of a successful top-up (or withdrawal).
#[derive(Debug, Clone)]
pub struct AddMoneyResult {
    pub user: User,
    pub transaction: Transaction,
}

impl AddMoneyResult {
    pub fn new_balance(&self) -> Cents {
        self.user.balance
    }
}

/// Result of a successful transfer: both updated users and both legs.
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub from: User,
    pub to: User,
    pub debit: Transaction,
    pub credit: Transaction,
}

/// Applies ledger operations. Each call owns exactly one atomic scope and
/// either commits all of its effects or none of them.
#[derive(Clone)]
pub struct TransactionProcessor {
    store: Arc<dyn LedgerStore>,
}

impl TransactionProcessor {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Credit (or, for a negative amount, debit) a single user.
    #[instrument(skip(self))]
    pub async fn add_money(
        &self,
        user_id: UserId,
        amount: Cents,
        request_id: RequestId,
    ) -> Result<AddMoneyResult, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(
                "Amount must not be zero".to_string(),
            ));
        }

        let mut scope = self.store.begin().await?;
        let outcome = Self::apply_add_money(scope.as_mut(), user_id, amount, request_id).await;
        let result = Self::finish(scope, outcome).await?;

        info!(
            new_balance = result.user.balance,
            transaction_id = result.transaction.id,
            "money added"
        );
        Ok(result)
    }

    /// Move `amount` from one user to another as a debit leg and a credit leg
    /// sharing `request_id`.
    #[instrument(skip(self))]
    pub async fn transfer_money(
        &self,
        from_user_id: UserId,
        to_user_id: UserId,
        amount: Cents,
        request_id: RequestId,
    ) -> Result<TransferResult, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(
                "Transfer amount must be positive".to_string(),
            ));
        }
        if from_user_id == to_user_id {
            return Err(LedgerError::SameAccount(from_user_id));
        }

        let mut scope = self.store.begin().await?;
        let outcome =
            Self::apply_transfer(scope.as_mut(), from_user_id, to_user_id, amount, request_id)
                .await;
        let result = Self::finish(scope, outcome).await?;

        info!(
            from_balance = result.from.balance,
            to_balance = result.to.balance,
            "money transferred"
        );
        Ok(result)
    }

    async fn apply_add_money(
        scope: &mut dyn LedgerScope,
        user_id: UserId,
        amount: Cents,
        request_id: RequestId,
    ) -> Result<AddMoneyResult, LedgerError> {
        IdempotencyGuard::check(scope, request_id).await?;

        let user = scope
            .get_user_for_update(user_id)
            .await?
            .ok_or_else(|| LedgerError::user_not_found(user_id))?;
        Self::ensure_funds(&user, amount)?;

        let user = scope.adjust_balance(user_id, amount).await?;
        let row = Self::ledger_row(user_id, amount, request_id)?;
        let transaction = IdempotencyGuard::record(scope, row).await?;

        Ok(AddMoneyResult { user, transaction })
    }

    async fn apply_transfer(
        scope: &mut dyn LedgerScope,
        from_user_id: UserId,
        to_user_id: UserId,
        amount: Cents,
        request_id: RequestId,
    ) -> Result<TransferResult, LedgerError> {
        IdempotencyGuard::check(scope, request_id).await?;

        // Lock both rows lowest id first, whichever direction the money flows.
        let (low, high) = if from_user_id < to_user_id {
            (from_user_id, to_user_id)
        } else {
            (to_user_id, from_user_id)
        };
        let low_user = scope.get_user_for_update(low).await?;
        let high_user = scope.get_user_for_update(high).await?;
        let (from, to) = if low == from_user_id {
            (low_user, high_user)
        } else {
            (high_user, low_user)
        };
        let from = from.ok_or_else(|| LedgerError::user_not_found(from_user_id))?;
        let to = to.ok_or_else(|| LedgerError::user_not_found(to_user_id))?;

        Self::ensure_funds(&from, -amount)?;
        Self::ensure_funds(&to, amount)?;

        let from = scope.adjust_balance(from_user_id, -amount).await?;
        let to = scope.adjust_balance(to_user_id, amount).await?;

        let debit =
            IdempotencyGuard::record(scope, Self::ledger_row(from_user_id, -amount, request_id)?)
                .await?;
        let credit =
            IdempotencyGuard::record(scope, Self::ledger_row(to_user_id, amount, request_id)?)
                .await?;

        Ok(TransferResult {
            from,
            to,
            debit,
            credit,
        })
    }

    /// Commit on success, roll back on failure. A failed rollback is logged
    /// and the original error returned.
    async fn finish<T>(
        scope: Box<dyn LedgerScope>,
        outcome: Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        match outcome {
            Ok(value) => {
                scope.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = scope.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                warn!(error = %err, "operation rolled back");
                Err(err)
            }
        }
    }

    fn ensure_funds(user: &User, delta: Cents) -> Result<(), LedgerError> {
        match user.balance_after(delta) {
            Ok(_) => Ok(()),
            Err(BalanceError::Insufficient) => Err(LedgerError::InsufficientFunds {
                user_id: user.id,
                balance: user.balance,
                required: delta.saturating_neg(),
            }),
            Err(BalanceError::Overflow) => Err(LedgerError::InvalidAmount(format!(
                "balance of user {} cannot hold another {}",
                user.id, delta
            ))),
        }
    }

    fn ledger_row(
        user_id: UserId,
        amount: Cents,
        request_id: RequestId,
    ) -> Result<NewTransaction, LedgerError> {
        NewTransaction::new(user_id, amount, request_id)
            .ok_or_else(|| LedgerError::InvalidAmount("Amount must not be zero".to_string()))
    }

    // ========================
    // Reads
    // ========================

    pub async fn get_user(&self, user_id: UserId) -> Result<User, LedgerError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::user_not_found(user_id))
    }

    pub async fn balance(&self, user_id: UserId) -> Result<Cents, LedgerError> {
        Ok(self.get_user(user_id).await?.balance)
    }

    pub async fn balance_by_email(&self, email: &str) -> Result<Cents, LedgerError> {
        self.store
            .get_user_by_email(email)
            .await?
            .map(|u| u.balance)
            .ok_or_else(|| LedgerError::UserNotFound(email.to_string()))
    }

    pub async fn list_users(&self) -> Result<Vec<User>, LedgerError> {
        Ok(self.store.list_users().await?)
    }

    /// Ledger rows for a user, oldest first.
    pub async fn history(&self, user_id: UserId) -> Result<Vec<Transaction>, LedgerError> {
        self.get_user(user_id).await?;
        Ok(self.store.transactions_for_user(user_id).await?)
    }

    /// Recompute every balance from the ledger rows and report disagreements.
    pub async fn check_consistency(&self) -> Result<ConsistencyReport, LedgerError> {
        let users = self.store.list_users().await?;
        let transactions = self.store.list_transactions().await?;
        Ok(check_consistency(&users, &transactions))
    }
}

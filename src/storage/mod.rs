//! Ledger persistence.
//!
//! [`LedgerStore`] is the capability set the transaction processor and the
//! messaging responder consume. Mutations only happen inside a
//! [`LedgerScope`], which commits or rolls back as a unit.

mod error;
mod memory;
mod sqlite;

use async_trait::async_trait;

use crate::domain::{Cents, NewTransaction, RequestId, Transaction, User, UserId};

pub use error::StoreError;
pub use memory::MemoryLedgerStore;
pub use sqlite::SqliteLedgerStore;

/// SQL migration for the ledger schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open an atomic scope. Dropping a scope without committing rolls it back.
    async fn begin(&self) -> StoreResult<Box<dyn LedgerScope>>;

    /// Insert a replicated user. Conflicting id or email is a
    /// [`StoreError::UniqueViolation`].
    async fn insert_user(&self, user: &User) -> StoreResult<()>;

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// All users ordered by id.
    async fn list_users(&self) -> StoreResult<Vec<User>>;

    /// All committed rows ordered by id.
    async fn list_transactions(&self) -> StoreResult<Vec<Transaction>>;

    async fn transactions_for_user(&self, user_id: UserId) -> StoreResult<Vec<Transaction>>;

    async fn transactions_for_request(&self, request_id: RequestId)
    -> StoreResult<Vec<Transaction>>;
}

/// One unit of work against the store.
#[async_trait]
pub trait LedgerScope: Send {
    /// Whether a row carrying `request_id` is visible to this scope.
    async fn request_seen(&mut self, request_id: RequestId) -> StoreResult<bool>;

    /// Read a user and hold its row lock until the scope ends.
    async fn get_user_for_update(&mut self, id: UserId) -> StoreResult<Option<User>>;

    /// Add `delta` to a user's balance and return the updated row.
    async fn adjust_balance(&mut self, id: UserId, delta: Cents) -> StoreResult<User>;

    /// Append a ledger row. A second row for the same request id and kind
    /// (or a request id owned by another scope) is a unique violation.
    async fn insert_transaction(&mut self, row: NewTransaction) -> StoreResult<Transaction>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

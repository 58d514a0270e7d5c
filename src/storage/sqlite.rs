use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteRow};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    Cents, NewTransaction, RequestId, Transaction, TransactionKind, User, UserId,
};

use super::{LedgerScope, LedgerStore, MIGRATION_001_INITIAL, StoreError, StoreResult};

const USER_COLUMNS: &str = "id, email, created_at, balance";
const TRANSACTION_COLUMNS: &str = "id, request_id, amount, created_at, type, user_id";

/// Ledger store backed by SQLite.
///
/// Every scope starts with `BEGIN IMMEDIATE`, which takes the database write
/// lock up front. That lock covers every row the scope touches, so
/// `get_user_for_update` needs no extra locking and scopes never deadlock on
/// a read-to-write upgrade.
///
/// The write lock is database-wide, not per row: scopes touching unrelated
/// users still run one at a time, and a waiting scope blocks for up to the
/// connection's busy timeout before failing with "database is locked".
/// Reads outside a scope see only committed state.
#[derive(Clone)]
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database, e.g. `sqlite:ledger.db?mode=rwc`.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to ledger database")?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run ledger migration 001")?;
        Ok(())
    }

    /// Connect and migrate.
    pub async fn init(database_url: &str) -> anyhow::Result<Self> {
        let store = Self::connect(database_url).await?;
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerScope>> {
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .context("Failed to open ledger scope")?;
        Ok(Box::new(SqliteScope { tx }))
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query("INSERT INTO users (id, email, created_at, balance) VALUES (?, ?, ?, ?)")
            .bind(user.id)
            .bind(&user.email)
            .bind(user.created_at.to_rfc3339())
            .bind(user.balance)
            .execute(&self.pool)
            .await
            .map_err(|e| map_write_error(e, "insert user"))?;
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user")?;
        Ok(row.as_ref().map(row_to_user).transpose()?)
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by email")?;
        Ok(row.as_ref().map(row_to_user).transpose()?)
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let rows = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .context("Failed to list users")?;
        Ok(rows.iter().map(row_to_user).collect::<anyhow::Result<_>>()?)
    }

    async fn list_transactions(&self) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions")?;
        Ok(rows
            .iter()
            .map(row_to_transaction)
            .collect::<anyhow::Result<_>>()?)
    }

    async fn transactions_for_user(&self, user_id: UserId) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = ? ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions for user")?;
        Ok(rows
            .iter()
            .map(row_to_transaction)
            .collect::<anyhow::Result<_>>()?)
    }

    async fn transactions_for_request(
        &self,
        request_id: RequestId,
    ) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE request_id = ? ORDER BY id"
        ))
        .bind(request_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions for request")?;
        Ok(rows
            .iter()
            .map(row_to_transaction)
            .collect::<anyhow::Result<_>>()?)
    }
}

struct SqliteScope {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl LedgerScope for SqliteScope {
    async fn request_seen(&mut self, request_id: RequestId) -> StoreResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM transactions WHERE request_id = ?) AS seen",
        )
        .bind(request_id.to_string())
        .fetch_one(&mut *self.tx)
        .await
        .context("Failed to check request id")?;
        Ok(row.get::<i64, _>("seen") != 0)
    }

    async fn get_user_for_update(&mut self, id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .context("Failed to fetch user for update")?;
        Ok(row.as_ref().map(row_to_user).transpose()?)
    }

    async fn adjust_balance(&mut self, id: UserId, delta: Cents) -> StoreResult<User> {
        let row = sqlx::query(&format!(
            "UPDATE users SET balance = balance + ? WHERE id = ? RETURNING {USER_COLUMNS}"
        ))
        .bind(delta)
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .context("Failed to adjust balance")?;

        match row {
            Some(row) => Ok(row_to_user(&row)?),
            None => Err(StoreError::UserMissing(id)),
        }
    }

    async fn insert_transaction(&mut self, row: NewTransaction) -> StoreResult<Transaction> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO transactions (request_id, amount, created_at, type, user_id)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(row.request_id().to_string())
        .bind(row.amount())
        .bind(row.created_at().to_rfc3339())
        .bind(row.kind().as_str())
        .bind(row.user_id())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_write_error(e, "insert transaction"))?;

        let id: i64 = inserted.get("id");
        debug!(transaction_id = id, request_id = %row.request_id(), "ledger row staged");
        Ok(row.into_transaction(id))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .commit()
            .await
            .context("Failed to commit ledger scope")?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back ledger scope")?;
        Ok(())
    }
}

fn map_write_error(err: sqlx::Error, action: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::UniqueViolation(format!("{action}: {}", db_err.message()));
        }
    }
    StoreError::Backend(anyhow::Error::new(err).context(format!("Failed to {action}")))
}

fn parse_timestamp(value: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .context("Invalid created_at timestamp")?
        .with_timezone(&Utc))
}

fn row_to_user(row: &SqliteRow) -> anyhow::Result<User> {
    let created_at: String = row.get("created_at");
    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        balance: row.get("balance"),
        created_at: parse_timestamp(&created_at)?,
    })
}

fn row_to_transaction(row: &SqliteRow) -> anyhow::Result<Transaction> {
    let request_id: String = row.get("request_id");
    let kind: String = row.get("type");
    let created_at: String = row.get("created_at");

    Ok(Transaction {
        id: row.get("id"),
        user_id: row.get("user_id"),
        amount: row.get("amount"),
        kind: TransactionKind::from_str(&kind)
            .ok_or_else(|| anyhow!("Invalid transaction type: {}", kind))?,
        request_id: Uuid::parse_str(&request_id).context("Invalid request id")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

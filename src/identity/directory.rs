use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use tracing::{info, instrument, warn};

use crate::application::LedgerError;
use crate::domain::{Cents, UserId};
use crate::messaging::{LedgerClient, UserCreated};

use super::MIGRATION_001_INITIAL;

/// A user as the identity service knows it: no balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityUser {
    pub id: UserId,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<&IdentityUser> for UserCreated {
    fn from(user: &IdentityUser) -> Self {
        UserCreated {
            id: user.id,
            email: user.email.clone(),
            created_at: user.created_at,
        }
    }
}

/// The identity service: owns the user directory and reaches the ledger
/// only through the bridge.
#[derive(Clone)]
pub struct IdentityService {
    pool: SqlitePool,
    ledger: LedgerClient,
}

impl IdentityService {
    pub fn new(pool: SqlitePool, ledger: LedgerClient) -> Self {
        Self { pool, ledger }
    }

    /// Connect to the directory database and apply the schema.
    pub async fn init(database_url: &str, ledger: LedgerClient) -> anyhow::Result<Self> {
        let pool = connect_directory(database_url).await?;
        Ok(Self::new(pool, ledger))
    }

    /// Register a user and replicate it to the ledger.
    ///
    /// The email is reserved by a `pending` row, committed on its own, so no
    /// write lock is held while waiting on the bridge. The row turns `active`
    /// once the ledger acknowledges it; any bridge failure (rejection,
    /// timeout, no ledger listening) deletes it again. Pending rows are
    /// invisible to lookups and counts.
    #[instrument(skip(self))]
    pub async fn create_user(&self, email: &str) -> Result<IdentityUser, LedgerError> {
        let email = normalize_email(email)?;
        let user = self.reserve(&email).await?;

        if let Err(err) = self.ledger.replicate_user(&UserCreated::from(&user)).await {
            if let Err(delete_err) = self.release(user.id).await {
                warn!(user_id = user.id, error = %delete_err, "failed to release pending user");
            }
            warn!(user_id = user.id, error = %err, "user creation rolled back");
            return Err(err);
        }

        sqlx::query("UPDATE identity_users SET status = 'active' WHERE id = ?")
            .bind(user.id)
            .execute(&self.pool)
            .await
            .context("Failed to activate identity user")?;
        info!(user_id = user.id, "user created");
        Ok(user)
    }

    /// Insert the `pending` row that holds the email and the id.
    async fn reserve(&self, email: &str) -> Result<IdentityUser, LedgerError> {
        let created_at = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO identity_users (email, created_at, status)
            VALUES (?, ?, 'pending')
            RETURNING id
            "#,
        )
        .bind(email)
        .bind(created_at.to_rfc3339())
        .fetch_one(&self.pool)
        .await;

        match row {
            Ok(row) => Ok(IdentityUser {
                id: row.get("id"),
                email: email.to_string(),
                created_at,
            }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(LedgerError::EmailAlreadyRegistered(email.to_string()))
            }
            Err(e) => Err(anyhow::Error::new(e)
                .context("Failed to insert identity user")
                .into()),
        }
    }

    async fn release(&self, id: UserId) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM identity_users WHERE id = ? AND status = 'pending'")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete pending identity user")?;
        Ok(())
    }

    /// Balance as held by the ledger. Unknown locally means unknown, without
    /// asking the ledger.
    #[instrument(skip(self))]
    pub async fn balance(&self, email: &str) -> Result<Cents, LedgerError> {
        if self.find_by_email(email).await?.is_none() {
            return Err(LedgerError::UserNotFound(email.to_string()));
        }
        self.ledger.query_balance(email).await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<IdentityUser>, LedgerError> {
        let row = sqlx::query(
            "SELECT id, email, created_at FROM identity_users WHERE email = ? AND status = 'active'",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch identity user")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let created_at: String = row.get("created_at");
        Ok(Some(IdentityUser {
            id: row.get("id"),
            email: row.get("email"),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .context("Invalid created_at in identity directory")?
                .with_timezone(&Utc),
        }))
    }

    pub async fn count(&self) -> Result<i64, LedgerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM identity_users WHERE status = 'active'")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count identity users")?;
        Ok(count)
    }
}

/// Open the directory database and apply the schema.
pub async fn connect_directory(database_url: &str) -> anyhow::Result<SqlitePool> {
    let pool = SqlitePool::connect(database_url)
        .await
        .context("Failed to connect to identity database")?;
    sqlx::query(MIGRATION_001_INITIAL)
        .execute(&pool)
        .await
        .context("Failed to run identity migration 001")?;
    Ok(pool)
}

/// Trim, then require a single `@` with something on both sides.
fn normalize_email(email: &str) -> Result<String, LedgerError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
        {
            Ok(email.to_string())
        }
        _ => Err(LedgerError::InvalidEmail(email.to_string())),
    }
}

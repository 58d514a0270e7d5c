// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;
use uuid::Uuid;
use wallet_ledger::TransactionProcessor;
use wallet_ledger::domain::{
    Cents, NewTransaction, RequestId, Transaction, TransactionKind, User, UserId,
};
use wallet_ledger::identity::IdentityService;
use wallet_ledger::messaging::{BridgeConfig, LedgerClient, LedgerResponder, LocalBus};
use wallet_ledger::storage::{
    LedgerScope, LedgerStore, MemoryLedgerStore, SqliteLedgerStore, StoreError, StoreResult,
};

/// `sqlite:` URL for a fresh database file inside `dir`.
pub fn sqlite_url(dir: &TempDir, name: &str) -> String {
    format!("sqlite:{}?mode=rwc", dir.path().join(name).display())
}

/// SQLite-backed store in a temporary directory
pub async fn sqlite_store() -> Result<(Arc<dyn LedgerStore>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let store = SqliteLedgerStore::init(&sqlite_url(&temp_dir, "ledger.db")).await?;
    Ok((Arc::new(store), temp_dir))
}

pub fn memory_store() -> Arc<dyn LedgerStore> {
    Arc::new(MemoryLedgerStore::new())
}

/// Seed users as replication would (empty balances), then fund each one
/// through the ledger so every balance is backed by its rows.
pub async fn seed(store: &Arc<dyn LedgerStore>, users: &[(UserId, Cents)]) -> Result<()> {
    let processor = TransactionProcessor::new(store.clone());
    for (id, balance) in users {
        let user = User::replicated(*id, format!("user{id}@example.com"), Utc::now());
        store.insert_user(&user).await?;
        if *balance != 0 {
            processor.add_money(*id, *balance, Uuid::new_v4()).await?;
        }
    }
    Ok(())
}

/// Both store implementations, each seeded with `users`. The `TempDir`
/// keeps the SQLite file alive.
pub async fn each_raw_store(
    users: &[(UserId, Cents)],
) -> Result<Vec<(&'static str, Arc<dyn LedgerStore>, Option<TempDir>)>> {
    let memory = memory_store();
    seed(&memory, users).await?;

    let (sqlite, temp_dir) = sqlite_store().await?;
    seed(&sqlite, users).await?;

    Ok(vec![
        ("memory", memory, None),
        ("sqlite", sqlite, Some(temp_dir)),
    ])
}

/// A processor over each store implementation.
pub async fn each_store(
    users: &[(UserId, Cents)],
) -> Result<Vec<(&'static str, TransactionProcessor, Option<TempDir>)>> {
    Ok(each_raw_store(users)
        .await?
        .into_iter()
        .map(|(name, store, temp_dir)| (name, TransactionProcessor::new(store), temp_dir))
        .collect())
}

/// Store whose scopes fail to write any credit row, after everything
/// before it has been staged.
pub struct FailingCreditStore {
    pub inner: Arc<dyn LedgerStore>,
}

struct FailingCreditScope {
    inner: Box<dyn LedgerScope>,
}

#[async_trait]
impl LedgerStore for FailingCreditStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerScope>> {
        Ok(Box::new(FailingCreditScope {
            inner: self.inner.begin().await?,
        }))
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        self.inner.insert_user(user).await
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        self.inner.get_user(id).await
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.inner.get_user_by_email(email).await
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        self.inner.list_users().await
    }

    async fn list_transactions(&self) -> StoreResult<Vec<Transaction>> {
        self.inner.list_transactions().await
    }

    async fn transactions_for_user(&self, user_id: UserId) -> StoreResult<Vec<Transaction>> {
        self.inner.transactions_for_user(user_id).await
    }

    async fn transactions_for_request(
        &self,
        request_id: RequestId,
    ) -> StoreResult<Vec<Transaction>> {
        self.inner.transactions_for_request(request_id).await
    }
}

#[async_trait]
impl LedgerScope for FailingCreditScope {
    async fn request_seen(&mut self, request_id: RequestId) -> StoreResult<bool> {
        self.inner.request_seen(request_id).await
    }

    async fn get_user_for_update(&mut self, id: UserId) -> StoreResult<Option<User>> {
        self.inner.get_user_for_update(id).await
    }

    async fn adjust_balance(&mut self, id: UserId, delta: Cents) -> StoreResult<User> {
        self.inner.adjust_balance(id, delta).await
    }

    async fn insert_transaction(&mut self, row: NewTransaction) -> StoreResult<Transaction> {
        if row.kind() == TransactionKind::Credit {
            return Err(StoreError::Backend(anyhow!("disk full")));
        }
        self.inner.insert_transaction(row).await
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.inner.rollback().await
    }
}

pub fn fast_bridge() -> BridgeConfig {
    BridgeConfig {
        replication_timeout: Duration::from_millis(500),
        balance_timeout: Duration::from_millis(500),
    }
}

/// Ledger responder and identity service wired over one in-process bus.
pub struct Wallet {
    pub bus: Arc<LocalBus>,
    pub ledger: Arc<dyn LedgerStore>,
    pub identity: IdentityService,
    pub client: LedgerClient,
    _temp_dir: TempDir,
}

impl Wallet {
    pub async fn start() -> Result<Self> {
        let wallet = Self::without_ledger().await?;
        LedgerResponder::new(wallet.ledger.clone(), wallet.bus.clone())
            .spawn()
            .await?;
        Ok(wallet)
    }

    /// Identity service with nobody answering on the ledger side.
    pub async fn without_ledger() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let bus = Arc::new(LocalBus::new());
        let ledger: Arc<dyn LedgerStore> =
            Arc::new(SqliteLedgerStore::init(&sqlite_url(&temp_dir, "ledger.db")).await?);
        let client = LedgerClient::new(bus.clone(), fast_bridge());
        let identity =
            IdentityService::init(&sqlite_url(&temp_dir, "identity.db"), client.clone()).await?;

        Ok(Self {
            bus,
            ledger,
            identity,
            client,
            _temp_dir: temp_dir,
        })
    }
}

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use crate::domain::{
    Cents, NewTransaction, RequestId, Transaction, TransactionId, User, UserId,
};

use super::{LedgerScope, LedgerStore, StoreError, StoreResult};

type ScopeId = u64;

/// In-process ledger store with per-user row locks.
///
/// Scopes stage their balance changes and rows privately and publish them in
/// one step on commit. A request id is claimed by the first scope that writes
/// a row for it; any other scope writing the same id gets a unique violation,
/// even before the first one commits.
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    row_locks: Mutex<HashMap<UserId, Arc<RowLock<()>>>>,
    next_scope: AtomicU64,
}

#[derive(Default)]
struct State {
    users: BTreeMap<UserId, User>,
    /// Committed rows keyed by id, so iteration is id order
    transactions: BTreeMap<TransactionId, Transaction>,
    last_transaction_id: TransactionId,
    claims: HashMap<RequestId, ScopeId>,
}

impl Inner {
    fn state(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend(anyhow!("ledger state lock poisoned")))
    }

    fn row_lock(&self, id: UserId) -> StoreResult<Arc<RowLock<()>>> {
        let mut locks = self
            .row_locks
            .lock()
            .map_err(|_| StoreError::Backend(anyhow!("row lock table poisoned")))?;
        Ok(Arc::clone(locks.entry(id).or_default()))
    }
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> StoreResult<Box<dyn LedgerScope>> {
        let id = self.inner.next_scope.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryScope {
            id,
            inner: Arc::clone(&self.inner),
            locks: HashMap::new(),
            users: HashMap::new(),
            rows: Vec::new(),
            claimed: Vec::new(),
            finished: false,
        }))
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut state = self.inner.state()?;
        if state.users.contains_key(&user.id) {
            return Err(StoreError::UniqueViolation(format!("users.id {}", user.id)));
        }
        if state.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::UniqueViolation(format!(
                "users.email {}",
                user.email
            )));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.inner.state()?.users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .inner
            .state()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        Ok(self.inner.state()?.users.values().cloned().collect())
    }

    async fn list_transactions(&self) -> StoreResult<Vec<Transaction>> {
        Ok(self.inner.state()?.transactions.values().cloned().collect())
    }

    async fn transactions_for_user(&self, user_id: UserId) -> StoreResult<Vec<Transaction>> {
        Ok(self
            .inner
            .state()?
            .transactions
            .values()
            .filter(|t| t.user_id == Some(user_id))
            .cloned()
            .collect())
    }

    async fn transactions_for_request(
        &self,
        request_id: RequestId,
    ) -> StoreResult<Vec<Transaction>> {
        Ok(self
            .inner
            .state()?
            .transactions
            .values()
            .filter(|t| t.request_id == request_id)
            .cloned()
            .collect())
    }
}

struct MemoryScope {
    id: ScopeId,
    inner: Arc<Inner>,
    locks: HashMap<UserId, OwnedMutexGuard<()>>,
    /// Working copies of the locked rows
    users: HashMap<UserId, User>,
    rows: Vec<Transaction>,
    claimed: Vec<RequestId>,
    finished: bool,
}

impl MemoryScope {
    async fn lock_row(&mut self, id: UserId) -> StoreResult<()> {
        if !self.locks.contains_key(&id) {
            let lock = self.inner.row_lock(id)?;
            let guard = lock.lock_owned().await;
            self.locks.insert(id, guard);
        }
        Ok(())
    }

    fn release_claims(&mut self, state: &mut State) {
        for request_id in self.claimed.drain(..) {
            if state.claims.get(&request_id) == Some(&self.id) {
                state.claims.remove(&request_id);
            }
        }
    }
}

#[async_trait]
impl LedgerScope for MemoryScope {
    async fn request_seen(&mut self, request_id: RequestId) -> StoreResult<bool> {
        if self.rows.iter().any(|t| t.request_id == request_id) {
            return Ok(true);
        }
        let state = self.inner.state()?;
        Ok(state.transactions.values().any(|t| t.request_id == request_id))
    }

    async fn get_user_for_update(&mut self, id: UserId) -> StoreResult<Option<User>> {
        self.lock_row(id).await?;
        if let Some(user) = self.users.get(&id) {
            return Ok(Some(user.clone()));
        }

        let user = self.inner.state()?.users.get(&id).cloned();
        if let Some(user) = &user {
            self.users.insert(id, user.clone());
        }
        Ok(user)
    }

    async fn adjust_balance(&mut self, id: UserId, delta: Cents) -> StoreResult<User> {
        if !self.users.contains_key(&id) && self.get_user_for_update(id).await?.is_none() {
            return Err(StoreError::UserMissing(id));
        }
        let user = self.users.get_mut(&id).ok_or(StoreError::UserMissing(id))?;
        user.balance = user
            .balance
            .checked_add(delta)
            .ok_or_else(|| StoreError::Backend(anyhow!("balance overflow for user {}", id)))?;
        Ok(user.clone())
    }

    async fn insert_transaction(&mut self, row: NewTransaction) -> StoreResult<Transaction> {
        let request_id = row.request_id();
        let mut state = self.inner.state()?;

        if state.transactions.values().any(|t| t.request_id == request_id) {
            return Err(StoreError::UniqueViolation(format!(
                "transactions.request_id {request_id}"
            )));
        }
        match state.claims.get(&request_id) {
            Some(owner) if *owner != self.id => {
                return Err(StoreError::UniqueViolation(format!(
                    "transactions.request_id {request_id} (in flight)"
                )));
            }
            Some(_) => {}
            None => {
                state.claims.insert(request_id, self.id);
                self.claimed.push(request_id);
            }
        }
        if self
            .rows
            .iter()
            .any(|t| t.request_id == request_id && t.kind == row.kind())
        {
            return Err(StoreError::UniqueViolation(format!(
                "transactions.(request_id, type) {request_id} {}",
                row.kind()
            )));
        }

        state.last_transaction_id += 1;
        let transaction = row.into_transaction(state.last_transaction_id);
        self.rows.push(transaction.clone());
        Ok(transaction)
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        let inner = Arc::clone(&self.inner);
        let mut state = inner.state()?;

        for (id, user) in &self.users {
            if let Some(stored) = state.users.get_mut(id) {
                stored.balance = user.balance;
            }
        }
        // Ids are handed out when staged, so commits can land out of id order.
        for row in self.rows.drain(..) {
            state.transactions.insert(row.id, row);
        }
        self.release_claims(&mut state);
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        let inner = Arc::clone(&self.inner);
        let mut state = inner.state()?;
        self.release_claims(&mut state);
        self.finished = true;
        Ok(())
    }
}

impl Drop for MemoryScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let inner = Arc::clone(&self.inner);
        if let Ok(mut state) = inner.state.lock() {
            self.release_claims(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    async fn store_with_users(balances: &[(UserId, Cents)]) -> MemoryLedgerStore {
        let store = MemoryLedgerStore::new();
        for (id, balance) in balances {
            let mut user = User::replicated(*id, format!("u{id}@example.com"), Utc::now());
            user.balance = *balance;
            store.insert_user(&user).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_uncommitted_changes_are_invisible() {
        let store = store_with_users(&[(1, 1000)]).await;
        let request_id = Uuid::new_v4();

        let mut scope = store.begin().await.unwrap();
        scope.adjust_balance(1, 500).await.unwrap();
        scope
            .insert_transaction(NewTransaction::new(1, 500, request_id).unwrap())
            .await
            .unwrap();

        assert_eq!(store.get_user(1).await.unwrap().unwrap().balance, 1000);
        assert!(store.list_transactions().await.unwrap().is_empty());

        scope.commit().await.unwrap();
        assert_eq!(store.get_user(1).await.unwrap().unwrap().balance, 1500);
        assert_eq!(store.transactions_for_request(request_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rows_listed_in_id_order_whatever_the_commit_order() {
        let store = store_with_users(&[(1, 0), (2, 0)]).await;

        let mut first = store.begin().await.unwrap();
        let early = first
            .insert_transaction(NewTransaction::new(1, 100, Uuid::new_v4()).unwrap())
            .await
            .unwrap();
        let mut second = store.begin().await.unwrap();
        let late = second
            .insert_transaction(NewTransaction::new(2, 200, Uuid::new_v4()).unwrap())
            .await
            .unwrap();
        assert!(early.id < late.id);

        second.commit().await.unwrap();
        first.commit().await.unwrap();

        let ids: Vec<_> = store
            .list_transactions()
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![early.id, late.id]);
    }

    #[tokio::test]
    async fn test_history_is_oldest_first() {
        let store = store_with_users(&[(1, 0)]).await;

        let mut first = store.begin().await.unwrap();
        let older = first
            .insert_transaction(NewTransaction::new(1, 100, Uuid::new_v4()).unwrap())
            .await
            .unwrap();
        let mut second = store.begin().await.unwrap();
        let newer = second
            .insert_transaction(NewTransaction::new(1, -50, Uuid::new_v4()).unwrap())
            .await
            .unwrap();

        second.commit().await.unwrap();
        first.commit().await.unwrap();

        let history = store.transactions_for_user(1).await.unwrap();
        assert_eq!(history.iter().map(|t| t.id).collect::<Vec<_>>(), vec![older.id, newer.id]);
    }

    #[tokio::test]
    async fn test_rollback_discards_everything() {
        let store = store_with_users(&[(1, 1000)]).await;

        let mut scope = store.begin().await.unwrap();
        scope.adjust_balance(1, -400).await.unwrap();
        scope
            .insert_transaction(NewTransaction::new(1, -400, Uuid::new_v4()).unwrap())
            .await
            .unwrap();
        scope.rollback().await.unwrap();

        assert_eq!(store.get_user(1).await.unwrap().unwrap().balance, 1000);
        assert!(store.list_transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_request_id_is_claimed() {
        let store = store_with_users(&[(1, 0), (2, 0)]).await;
        let request_id = Uuid::new_v4();

        let mut first = store.begin().await.unwrap();
        first
            .insert_transaction(NewTransaction::new(1, 100, request_id).unwrap())
            .await
            .unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second
            .insert_transaction(NewTransaction::new(2, 100, request_id).unwrap())
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());

        // Dropping the owner releases the claim.
        drop(first);
        second
            .insert_transaction(NewTransaction::new(2, 100, request_id).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_row_lock_blocks_second_scope() {
        let store = store_with_users(&[(1, 0)]).await;

        let mut holder = store.begin().await.unwrap();
        holder.get_user_for_update(1).await.unwrap();

        let contender = store.clone();
        let waiter = tokio::spawn(async move {
            let mut scope = contender.begin().await.unwrap();
            scope.get_user_for_update(1).await.unwrap()
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        holder.rollback().await.unwrap();
        let user = waiter.await.unwrap();
        assert_eq!(user.map(|u| u.id), Some(1));
    }

    #[tokio::test]
    async fn test_duplicate_user_rejected() {
        let store = store_with_users(&[(1, 0)]).await;

        let same_id = User::replicated(1, "other@example.com", Utc::now());
        assert!(store.insert_user(&same_id).await.unwrap_err().is_unique_violation());

        let same_email = User::replicated(2, "u1@example.com", Utc::now());
        assert!(store.insert_user(&same_email).await.unwrap_err().is_unique_violation());
    }

    #[tokio::test]
    async fn test_adjust_missing_user() {
        let store = MemoryLedgerStore::new();
        let mut scope = store.begin().await.unwrap();
        assert!(matches!(
            scope.adjust_balance(99, 10).await,
            Err(StoreError::UserMissing(99))
        ));
    }
}

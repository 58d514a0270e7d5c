use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::application::LedgerError;
use crate::domain::User;
use crate::storage::LedgerStore;

use super::protocol::{
    Ack, BalanceReply, GET_BALANCE_SUBJECT, USER_CREATED_SUBJECT, UserCreated, decode_email,
};
use super::{BusError, Envelope, MessageBus, Subscription};

/// Ledger side of the bridge: answers `user-created` and `get-balance`.
#[derive(Clone)]
pub struct LedgerResponder {
    store: Arc<dyn LedgerStore>,
    bus: Arc<dyn MessageBus>,
}

impl LedgerResponder {
    pub fn new(store: Arc<dyn LedgerStore>, bus: Arc<dyn MessageBus>) -> Self {
        Self { store, bus }
    }

    /// Subscribe to both subjects and serve until the bus closes them.
    pub async fn run(self) -> Result<(), BusError> {
        let (user_created, get_balance) = self.subscribe_all().await?;
        self.serve(user_created, get_balance).await;
        Ok(())
    }

    /// Subscribe, then serve in the background. Returns once both
    /// subscriptions are live, so requests sent afterwards are answered.
    pub async fn spawn(self) -> Result<JoinHandle<()>, BusError> {
        let (user_created, get_balance) = self.subscribe_all().await?;
        Ok(tokio::spawn(self.serve(user_created, get_balance)))
    }

    async fn subscribe_all(&self) -> Result<(Subscription, Subscription), BusError> {
        let user_created = self.bus.subscribe(USER_CREATED_SUBJECT).await?;
        let get_balance = self.bus.subscribe(GET_BALANCE_SUBJECT).await?;
        info!(
            "Ledger responder listening on '{}' and '{}'",
            USER_CREATED_SUBJECT, GET_BALANCE_SUBJECT
        );
        Ok((user_created, get_balance))
    }

    /// One task per message.
    async fn serve(self, mut user_created: Subscription, mut get_balance: Subscription) {
        loop {
            let message = tokio::select! {
                Some(message) = user_created.next() => message,
                Some(message) = get_balance.next() => message,
                else => break,
            };
            let responder = self.clone();
            tokio::spawn(async move { responder.dispatch(message).await });
        }
        info!("Ledger responder stopped");
    }

    async fn dispatch(&self, message: Envelope) {
        let reply = match message.subject.as_str() {
            USER_CREATED_SUBJECT => self.handle_user_created(&message.payload).await.encode(),
            GET_BALANCE_SUBJECT => self.handle_get_balance(&message.payload).await,
            other => {
                warn!(subject = other, "message on unexpected subject dropped");
                return;
            }
        };

        let Some(reply_to) = message.reply else {
            debug!(subject = %message.subject, "no reply subject; answer dropped");
            return;
        };
        if let Err(e) = self.bus.publish(&reply_to, reply).await {
            error!(subject = %message.subject, error = %e, "failed to publish reply");
        }
    }

    /// Create the replicated user with a zero balance. Replaying the same
    /// event succeeds without changes.
    pub async fn handle_user_created(&self, payload: &[u8]) -> Ack {
        let event = match UserCreated::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "rejecting user-created message");
                return Ack::error(e.to_string());
            }
        };

        match self.replicate(&event).await {
            Ok(true) => {
                info!(user_id = event.id, email = %event.email, "user replicated");
                Ack::success("User created successfully in ledger")
            }
            Ok(false) => {
                debug!(user_id = event.id, "user already replicated");
                Ack::success("User already exists in ledger")
            }
            Err(e) => {
                warn!(user_id = event.id, email = %event.email, error = %e, "replication rejected");
                Ack::error(e.to_string())
            }
        }
    }

    /// `Ok(true)` when inserted, `Ok(false)` when the identical user exists.
    async fn replicate(&self, event: &UserCreated) -> Result<bool, LedgerError> {
        if self.already_replicated(event).await? {
            return Ok(false);
        }

        let user = User::replicated(event.id, event.email.clone(), event.created_at);
        match self.store.insert_user(&user).await {
            Ok(()) => Ok(true),
            // A concurrent replay may have won the insert.
            Err(e) if e.is_unique_violation() => {
                if self.already_replicated(event).await? {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the same user exists; a user sharing only the id or only the
    /// email is a conflict.
    async fn already_replicated(&self, event: &UserCreated) -> Result<bool, LedgerError> {
        if let Some(existing) = self.store.get_user(event.id).await? {
            if existing.email == event.email {
                return Ok(true);
            }
            return Err(LedgerError::ReplicationRejected(format!(
                "user {} already exists with a different email",
                event.id
            )));
        }
        if let Some(existing) = self.store.get_user_by_email(&event.email).await? {
            return Err(LedgerError::ReplicationRejected(format!(
                "email {} already belongs to user {}",
                event.email, existing.id
            )));
        }
        Ok(false)
    }

    pub async fn handle_get_balance(&self, payload: &[u8]) -> Bytes {
        let reply = match decode_email(payload) {
            Ok(email) => match self.store.get_user_by_email(&email).await {
                Ok(Some(user)) => {
                    debug!(email = %email, balance = user.balance, "balance served");
                    BalanceReply::Balance(user.balance)
                }
                Ok(None) => BalanceReply::Error(LedgerError::UserNotFound(email).to_string()),
                Err(e) => {
                    error!(error = %e, "balance lookup failed");
                    BalanceReply::Error(e.to_string())
                }
            },
            Err(e) => BalanceReply::Error(e.to_string()),
        };
        reply.encode()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::messaging::{AckStatus, LocalBus};
    use crate::storage::MemoryLedgerStore;

    fn responder() -> (LedgerResponder, MemoryLedgerStore) {
        let store = MemoryLedgerStore::new();
        let responder = LedgerResponder::new(Arc::new(store.clone()), Arc::new(LocalBus::new()));
        (responder, store)
    }

    fn event(id: i64, email: &str) -> Vec<u8> {
        UserCreated {
            id,
            email: email.to_string(),
            created_at: Utc::now(),
        }
        .encode()
        .unwrap()
        .to_vec()
    }

    #[tokio::test]
    async fn test_replication_creates_user_with_zero_balance() {
        let (responder, store) = responder();

        let ack = responder.handle_user_created(&event(7, "a@example.com")).await;
        assert!(ack.is_success());

        let user = store.get_user(7).await.unwrap().unwrap();
        assert_eq!(user.email, "a@example.com");
        assert_eq!(user.balance, 0);
    }

    #[tokio::test]
    async fn test_replication_replay_is_accepted() {
        let (responder, store) = responder();
        let payload = event(7, "a@example.com");

        assert!(responder.handle_user_created(&payload).await.is_success());
        assert!(responder.handle_user_created(&payload).await.is_success());
        assert_eq!(store.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replication_conflicts_are_rejected() {
        let (responder, _store) = responder();
        responder.handle_user_created(&event(7, "a@example.com")).await;

        let same_id = responder.handle_user_created(&event(7, "b@example.com")).await;
        assert_eq!(same_id.status, AckStatus::Error);

        let same_email = responder.handle_user_created(&event(8, "a@example.com")).await;
        assert_eq!(same_email.status, AckStatus::Error);
    }

    #[tokio::test]
    async fn test_malformed_replication_gets_error_ack() {
        let (responder, store) = responder();
        let ack = responder.handle_user_created(b"not json").await;

        assert_eq!(ack.status, AckStatus::Error);
        assert!(store.list_users().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_balance_reply() {
        let (responder, store) = responder();
        let mut user = User::replicated(1, "a@example.com".to_string(), Utc::now());
        user.balance = 12345;
        store.insert_user(&user).await.unwrap();

        assert_eq!(responder.handle_get_balance(b"a@example.com").await, "123.45");

        let missing = responder.handle_get_balance(b"x@example.com").await;
        assert!(matches!(
            BalanceReply::decode(&missing).unwrap(),
            BalanceReply::Error(_)
        ));
    }
}

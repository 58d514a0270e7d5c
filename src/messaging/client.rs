use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::application::LedgerError;
use crate::domain::Cents;

use super::MessageBus;
use super::protocol::{Ack, BalanceReply, GET_BALANCE_SUBJECT, USER_CREATED_SUBJECT, UserCreated};

/// Caller-side timeouts for the two bridge protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub replication_timeout: Duration,
    pub balance_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            replication_timeout: Duration::from_secs(10),
            balance_timeout: Duration::from_secs(5),
        }
    }
}

/// Identity side of the bridge. Never retries: a timeout surfaces as
/// [`LedgerError::MessagingTimeout`] and the outcome is unknown.
#[derive(Clone)]
pub struct LedgerClient {
    bus: Arc<dyn MessageBus>,
    config: BridgeConfig,
}

impl LedgerClient {
    pub fn new(bus: Arc<dyn MessageBus>, config: BridgeConfig) -> Self {
        Self { bus, config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Push a new user to the ledger; `Ok` only on a success acknowledgement.
    pub async fn replicate_user(&self, user: &UserCreated) -> Result<Ack, LedgerError> {
        let reply = self
            .bus
            .request(
                USER_CREATED_SUBJECT,
                user.encode()?,
                self.config.replication_timeout,
            )
            .await?;

        let ack = Ack::decode(&reply)?;
        if !ack.is_success() {
            warn!(user_id = user.id, message = %ack.message, "ledger rejected replication");
            return Err(LedgerError::ReplicationRejected(ack.message));
        }
        info!(user_id = user.id, "user replicated to ledger");
        Ok(ack)
    }

    pub async fn query_balance(&self, email: &str) -> Result<Cents, LedgerError> {
        let reply = self
            .bus
            .request(
                GET_BALANCE_SUBJECT,
                email.as_bytes().to_vec().into(),
                self.config.balance_timeout,
            )
            .await?;

        match BalanceReply::decode(&reply)? {
            BalanceReply::Balance(cents) => {
                debug!(email, balance = cents, "balance received");
                Ok(cents)
            }
            BalanceReply::Error(message) => {
                debug!(email, message = %message, "ledger has no balance");
                Err(LedgerError::UserNotFound(email.to_string()))
            }
        }
    }
}

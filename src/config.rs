//! Runtime configuration.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::messaging::BridgeConfig;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:ledger.db?mode=rwc";
pub const DEFAULT_IDENTITY_DATABASE_URL: &str = "sqlite:identity.db?mode=rwc";
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Ledger database
    pub database_url: String,

    /// Identity directory database
    pub identity_database_url: String,

    pub nats_url: String,

    pub bridge: BridgeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            identity_database_url: DEFAULT_IDENTITY_DATABASE_URL.to_string(),
            nats_url: DEFAULT_NATS_URL.to_string(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl Config {
    /// Defaults overridden by `DATABASE_URL`, `IDENTITY_DATABASE_URL`,
    /// `NATS_URL`, `REPLICATION_TIMEOUT_MS` and `BALANCE_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| -> Result<Duration> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .with_context(|| format!("{key} must be a number of milliseconds, got {raw:?}")),
                None => Ok(default),
            }
        };

        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            identity_database_url: lookup("IDENTITY_DATABASE_URL")
                .unwrap_or(defaults.identity_database_url),
            nats_url: lookup("NATS_URL").unwrap_or(defaults.nats_url),
            bridge: BridgeConfig {
                replication_timeout: millis(
                    "REPLICATION_TIMEOUT_MS",
                    defaults.bridge.replication_timeout,
                )?,
                balance_timeout: millis("BALANCE_TIMEOUT_MS", defaults.bridge.balance_timeout)?,
            },
        })
    }
}

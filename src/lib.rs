pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod identity;
pub mod messaging;
pub mod storage;

pub use application::{LedgerError, TransactionProcessor};
pub use domain::*;
pub use storage::{LedgerStore, MemoryLedgerStore, SqliteLedgerStore};

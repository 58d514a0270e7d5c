//! Application layer: the ledger operations and their error taxonomy.

pub mod error;
mod idempotency;
mod processor;
pub mod requests;

pub use error::*;
pub use idempotency::IdempotencyGuard;
pub use processor::*;

//! Bridge between the identity service and the ledger.
//!
//! [`MessageBus`] abstracts the transport (NATS in production, [`LocalBus`]
//! in-process). [`LedgerResponder`] serves the ledger side and
//! [`LedgerClient`] is what the identity side calls.

mod bus;
mod client;
mod local;
mod nats;
pub mod protocol;
mod responder;

pub use bus::{BusError, Envelope, MessageBus, Subscription};
pub use client::{BridgeConfig, LedgerClient};
pub use local::LocalBus;
pub use nats::NatsBus;
pub use protocol::{Ack, AckStatus, BalanceReply, UserCreated};
pub use responder::LedgerResponder;

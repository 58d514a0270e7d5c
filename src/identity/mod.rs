//! Identity service: the user directory that lives outside the ledger.

mod directory;

pub use directory::{IdentityService, IdentityUser, connect_directory};

/// SQL migration for the identity directory
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

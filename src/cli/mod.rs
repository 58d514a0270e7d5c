use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::application::TransactionProcessor;
use crate::config::Config;
use crate::domain::{RequestId, UserId, format_cents, parse_cents};
use crate::identity::{IdentityService, connect_directory};
use crate::messaging::{LedgerClient, LedgerResponder, NatsBus};
use crate::storage::SqliteLedgerStore;

/// Wallet Ledger - idempotent ledger core of a two-service digital wallet
#[derive(Parser)]
#[command(name = "wallet-ledger")]
#[command(about = "Idempotent balance ledger with NATS user replication")]
#[command(version)]
pub struct Cli {
    /// Ledger database URL
    #[arg(short, long, env = "DATABASE_URL", global = true)]
    pub database: Option<String>,

    /// Identity directory database URL
    #[arg(long, env = "IDENTITY_DATABASE_URL", global = true)]
    pub identity_database: Option<String>,

    /// NATS server URL
    #[arg(long, env = "NATS_URL", global = true)]
    pub nats_url: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the ledger and identity databases
    Init,

    /// Answer user replication and balance queries over NATS
    Serve,

    /// Credit a user (a negative amount debits)
    AddMoney {
        user_id: UserId,

        /// Amount (e.g., "50.00" or "-30")
        #[arg(allow_hyphen_values = true)]
        amount: String,

        /// Idempotency key (random if omitted)
        #[arg(long)]
        request_id: Option<RequestId>,
    },

    /// Move money between two users
    Transfer {
        /// Amount to transfer (e.g., "30.00")
        amount: String,

        /// Sending user id
        #[arg(long)]
        from: UserId,

        /// Receiving user id
        #[arg(long)]
        to: UserId,

        /// Idempotency key (random if omitted)
        #[arg(long)]
        request_id: Option<RequestId>,
    },

    /// Show a user's balance, or every user's
    Balance { user_id: Option<UserId> },

    /// List a user's ledger rows
    History { user_id: UserId },

    /// Verify that every balance matches its ledger rows
    Check,

    /// Register a user in the identity directory and replicate it
    CreateUser { email: String },

    /// Ask the ledger for a balance through the identity service
    RemoteBalance { email: String },
}

impl Cli {
    /// Environment configuration with command-line overrides.
    fn config(&self) -> Result<Config> {
        let mut config = Config::from_env()?;
        if let Some(url) = &self.database {
            config.database_url = url.clone();
        }
        if let Some(url) = &self.identity_database {
            config.identity_database_url = url.clone();
        }
        if let Some(url) = &self.nats_url {
            config.nats_url = url.clone();
        }
        Ok(config)
    }

    fn init_tracing(&self) {
        let default = if self.verbose {
            "debug"
        } else if matches!(self.command, Commands::Serve) {
            "info"
        } else {
            "warn"
        };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
        // A subscriber may already be installed when embedded; keep it.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    pub async fn run(self) -> Result<()> {
        self.init_tracing();
        let config = self.config()?;

        match self.command {
            Commands::Init => {
                SqliteLedgerStore::init(&config.database_url).await?;
                println!("Ledger database initialized: {}", config.database_url);
                connect_directory(&config.identity_database_url).await?;
                println!(
                    "Identity database initialized: {}",
                    config.identity_database_url
                );
            }

            Commands::Serve => {
                let store = SqliteLedgerStore::init(&config.database_url).await?;
                let bus = NatsBus::connect(&config.nats_url).await?;
                let responder = LedgerResponder::new(Arc::new(store), Arc::new(bus));
                let handle = responder.spawn().await?;

                println!("Ledger serving on {} (Ctrl-C to stop)", config.nats_url);
                tokio::signal::ctrl_c()
                    .await
                    .context("Failed to listen for shutdown signal")?;
                handle.abort();
                println!("Shutting down");
            }

            Commands::AddMoney {
                user_id,
                amount,
                request_id,
            } => {
                let processor = processor(&config).await?;
                let amount_cents =
                    parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
                let request_id = request_id.unwrap_or_else(Uuid::new_v4);

                let result = processor.add_money(user_id, amount_cents, request_id).await?;
                println!(
                    "Recorded {} {} for user {} (request {})",
                    result.transaction.kind,
                    format_cents(result.transaction.amount.abs()),
                    user_id,
                    request_id
                );
                println!("New balance: {}", format_cents(result.new_balance()));
            }

            Commands::Transfer {
                amount,
                from,
                to,
                request_id,
            } => {
                let processor = processor(&config).await?;
                let amount_cents =
                    parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
                let request_id = request_id.unwrap_or_else(Uuid::new_v4);

                let result = processor
                    .transfer_money(from, to, amount_cents, request_id)
                    .await?;
                println!(
                    "Transferred {} from user {} to user {} (request {})",
                    format_cents(amount_cents),
                    from,
                    to,
                    request_id
                );
                println!(
                    "  user {:<8} {:>12}",
                    result.from.id,
                    format_cents(result.from.balance)
                );
                println!(
                    "  user {:<8} {:>12}",
                    result.to.id,
                    format_cents(result.to.balance)
                );
            }

            Commands::Balance { user_id } => {
                let processor = processor(&config).await?;
                run_balance_command(&processor, user_id).await?;
            }

            Commands::History { user_id } => {
                let processor = processor(&config).await?;
                run_history_command(&processor, user_id).await?;
            }

            Commands::Check => {
                let processor = processor(&config).await?;
                run_check_command(&processor).await?;
            }

            Commands::CreateUser { email } => {
                let identity = identity_service(&config).await?;
                let user = identity.create_user(&email).await?;
                println!("Created user {} ({})", user.id, user.email);
            }

            Commands::RemoteBalance { email } => {
                let identity = identity_service(&config).await?;
                let balance = identity.balance(&email).await?;
                println!("{}: {}", email, format_cents(balance));
            }
        }

        Ok(())
    }
}

async fn processor(config: &Config) -> Result<TransactionProcessor> {
    let store = SqliteLedgerStore::init(&config.database_url).await?;
    Ok(TransactionProcessor::new(Arc::new(store)))
}

async fn identity_service(config: &Config) -> Result<IdentityService> {
    let bus = NatsBus::connect(&config.nats_url).await?;
    let client = LedgerClient::new(Arc::new(bus), config.bridge);
    IdentityService::init(&config.identity_database_url, client).await
}

async fn run_balance_command(processor: &TransactionProcessor, user_id: Option<UserId>) -> Result<()> {
    if let Some(user_id) = user_id {
        let user = processor.get_user(user_id).await?;
        println!("{} ({}): {}", user.id, user.email, format_cents(user.balance));
        return Ok(());
    }

    let users = processor.list_users().await?;
    if users.is_empty() {
        println!("No users found.");
        return Ok(());
    }

    println!("{:<8} {:<32} {:>12}", "ID", "EMAIL", "BALANCE");
    println!("{}", "-".repeat(54));
    let mut total = 0;
    for user in &users {
        println!(
            "{:<8} {:<32} {:>12}",
            user.id,
            user.email,
            format_cents(user.balance)
        );
        total += user.balance;
    }
    println!("{}", "-".repeat(54));
    println!("{:<41} {:>12}", "TOTAL", format_cents(total));
    Ok(())
}

async fn run_history_command(processor: &TransactionProcessor, user_id: UserId) -> Result<()> {
    let rows = processor.history(user_id).await?;
    if rows.is_empty() {
        println!("No transactions for user {}.", user_id);
        return Ok(());
    }

    println!(
        "{:<6} {:<20} {:<7} {:>12}  {}",
        "ID", "DATE", "TYPE", "AMOUNT", "REQUEST"
    );
    println!("{}", "-".repeat(86));
    for row in &rows {
        println!(
            "{:<6} {:<20} {:<7} {:>12}  {}",
            row.id,
            row.created_at.format("%Y-%m-%d %H:%M:%S"),
            row.kind,
            format_cents(row.amount),
            row.request_id
        );
    }
    Ok(())
}

async fn run_check_command(processor: &TransactionProcessor) -> Result<()> {
    println!("Checking ledger consistency...\n");

    let report = processor.check_consistency().await?;

    println!("Users:        {}", report.user_count);
    println!("Transactions: {}", report.transaction_count);
    println!();

    if report.is_consistent() {
        println!("Ledger is consistent.");
        return Ok(());
    }

    println!("Issues found:");
    for mismatch in &report.mismatches {
        println!(
            "  - user {}: stored {} but ledger sums to {}",
            mismatch.user_id,
            format_cents(mismatch.stored),
            format_cents(mismatch.computed)
        );
    }
    for user_id in &report.negative_balances {
        println!("  - user {} has a negative balance", user_id);
    }
    if report.orphaned_rows > 0 {
        println!("  - {} rows reference no user", report.orphaned_rows);
    }
    if report.misclassified_rows > 0 {
        println!(
            "  - {} rows have a type that disagrees with their sign",
            report.misclassified_rows
        );
    }
    anyhow::bail!("Ledger consistency check failed");
}

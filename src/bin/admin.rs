//! openpenpal-admin — operational chores against the configured store.
//!
//! Exit codes: 0 success, 1 configuration, 2 connectivity, 3 policy
//! rejection.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use openpenpal::api::state::AppState;
use openpenpal::config::{AppConfig, StoreKind};
use openpenpal::store::memory::MemoryStore;
use openpenpal::store::Stores;
use openpenpal_core::clock::{Clock, SystemClock};
use openpenpal_core::error::CoreError;
use openpenpal_postgres::PgStores;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "openpenpal-admin", about = "OpenPenPal operational tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Allocate a batch of fresh barcodes and print them.
    GenBarcodes {
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
    /// Run one credit expiry sweep.
    SweepExpiry,
    /// Run one failed-credit-task retry sweep.
    SweepRetry,
    /// Print a user's credit account.
    Balance {
        #[arg(long)]
        user: Uuid,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let stores = match config.store {
        StoreKind::Memory => Stores::from_store(Arc::new(MemoryStore::new(Arc::clone(&clock)))),
        StoreKind::Postgres => {
            let pool = match PgPoolOptions::new()
                .max_connections(2)
                .connect(&config.database_url)
                .await
            {
                Ok(pool) => pool,
                Err(e) => {
                    eprintln!("cannot reach database: {e}");
                    return ExitCode::from(2);
                }
            };
            PgStores::new(pool).into_stores()
        }
    };
    let state = AppState::build(config, stores, clock);

    match run(&cli.command, &state).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn run(command: &Command, state: &Arc<AppState>) -> Result<(), CoreError> {
    match command {
        Command::GenBarcodes { count } => {
            let codes = state.barcodes.allocate(*count).await?;
            for code in codes {
                println!("{}", code.code);
            }
            Ok(())
        }
        Command::SweepExpiry => {
            let reversed = state.ledger.expire_once().await?;
            println!("expired {reversed} transactions");
            Ok(())
        }
        Command::SweepRetry => {
            let reset = state.pool.retry_sweep().await?;
            println!("reset {reset} failed credit tasks");
            Ok(())
        }
        Command::Balance { user } => {
            let account = state.ledger.balance(*user).await?;
            println!(
                "user {} balance {} lifetime {} level {}",
                account.user_id, account.balance, account.lifetime_earned, account.level
            );
            Ok(())
        }
    }
}

fn exit_code_for(e: &CoreError) -> u8 {
    match e {
        CoreError::UserBlocked(_)
        | CoreError::SuspiciousActivity { .. }
        | CoreError::LimitExceeded { .. }
        | CoreError::PermissionDenied(_)
        | CoreError::ScopeViolation(_)
        | CoreError::LevelMismatch { .. } => 3,
        CoreError::Internal(_) => 2,
        _ => 1,
    }
}

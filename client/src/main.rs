//! fieldsync - inspect and drain the local sync queue from a terminal.
//!
//! Reads configuration from the environment (and `.env`), opens the local
//! store and talks to the configured backend.

use clap::{Parser, Subcommand};
use fieldsync_client::{
    ClientConfig, ConnectivityMonitor, HttpClient, LocalStore, StaticSession, SyncEngine,
};
use fieldsync_engine::{Catalog, Seq};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fieldsync", version, about = "Offline sync queue tool")]
struct Cli {
    /// SQLite database URL (overrides DATABASE_URL)
    #[arg(long)]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show queue counts
    Status,
    /// List parked operations with their last error
    Failed,
    /// Replay pending operations now
    Sync,
    /// Move a parked operation back to pending
    Retry { seq: Seq },
    /// Drop a queued operation
    Discard { seq: Seq },
    /// Replace local synced rows of an entity type with the server listing
    Refresh { entity_type: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldsync_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut config = ClientConfig::from_env()?;
    if let Some(database) = cli.database {
        config.database_url = database;
    }

    let store = LocalStore::open(&config.database_url, Catalog::standard()).await?;

    match cli.command {
        Command::Status => {
            println!("pending: {}", store.pending_count().await?);
            println!("failed:  {}", store.failed_count().await?);
        }
        Command::Failed => {
            for op in store.failed_operations().await? {
                println!(
                    "{:>6}  {:<6} {}/{}  attempts={}  {}",
                    op.seq,
                    op.kind,
                    op.entity_type,
                    op.entity_id,
                    op.attempts,
                    op.last_error.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Retry { seq } => {
            store.retry_failed(seq).await?;
            println!("operation {seq} is pending again");
        }
        Command::Discard { seq } => {
            let op = store.discard_operation(seq).await?;
            println!("discarded {} of {}/{}", op.kind, op.entity_type, op.entity_id);
        }
        Command::Sync => {
            let report = online_engine(&config, &store)?.drain().await?;
            println!("applied: {}", report.applied.len());
            println!("parked:  {}", report.parked.len());
            if let Some(halted) = report.halted {
                println!("halted:  {halted:?}");
            }
        }
        Command::Refresh { entity_type } => {
            let stored = online_engine(&config, &store)?
                .refresh_collection(&entity_type)
                .await?;
            println!("stored {stored} {entity_type} rows from server");
        }
    }

    store.close().await;
    Ok(())
}

/// A sync engine for one-shot commands.
///
/// A terminal has no network-change signals, so connectivity is assumed and
/// the HTTP client reports otherwise.
fn online_engine(config: &ClientConfig, store: &LocalStore) -> fieldsync_client::Result<SyncEngine> {
    let session = Arc::new(StaticSession::new(config.auth_token.clone(), config.user_id.clone()));
    let http = HttpClient::new(config, session)?;
    let monitor = ConnectivityMonitor::new(true);
    Ok(SyncEngine::new(store.clone(), http, monitor.handle()))
}

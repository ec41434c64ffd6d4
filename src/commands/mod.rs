pub mod cleanup;
pub mod client;
pub mod ingest;
pub mod migrate;
pub mod rate;
pub mod rollover;
pub mod stats;

use crate::{Config, engine::MeteringEngine};
use clap::Subcommand;
use serde::Serialize;

#[derive(Subcommand)]
pub enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: migrate::MigrateAction,
    },
    /// Manage client organizations
    Client {
        #[command(subcommand)]
        action: client::ClientAction,
    },
    /// Record usage events from a JSON array or JSON-lines file
    Ingest(ingest::IngestArgs),
    /// Close stale live counters
    Rollover(rollover::RolloverArgs),
    /// Prune the processed generation ledger
    Cleanup(cleanup::CleanupArgs),
    /// Usage and billing reports
    Stats {
        #[command(subcommand)]
        report: stats::StatsReport,
    },
    /// Look up an exchange rate
    Rate(rate::RateArgs),
}

pub async fn handle_command(
    command: Commands,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Migrate { action } => migrate::handle_migrate_command(action, config).await,
        Commands::Client { action } => {
            client::handle_client_command(action, &engine(config).await?).await
        }
        Commands::Ingest(args) => ingest::handle_ingest_command(args, &engine(config).await?).await,
        Commands::Rollover(args) => {
            rollover::handle_rollover_command(args, &engine(config).await?).await
        }
        Commands::Cleanup(args) => {
            cleanup::handle_cleanup_command(args, &engine(config).await?).await
        }
        Commands::Stats { report } => {
            stats::handle_stats_command(report, &engine(config).await?).await
        }
        Commands::Rate(args) => rate::handle_rate_command(args, &engine(config).await?).await,
    }
}

/// Engine for a one-shot command, migrated when configured to
async fn engine(config: &Config) -> Result<MeteringEngine, Box<dyn std::error::Error>> {
    let engine = MeteringEngine::from_config(config.clone()).await?;
    if config.database.migration_on_startup {
        engine.database.migrate().await?;
    }
    Ok(engine)
}

/// Command results go to stdout as pretty JSON; logs stay on stderr
fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

use super::print_json;
use crate::engine::MeteringEngine;
use clap::Args;

#[derive(Args)]
pub struct RolloverArgs {
    /// Roll over a single client instead of sweeping all stale counters
    #[arg(long)]
    client: Option<String>,
}

pub async fn handle_rollover_command(
    args: RolloverArgs,
    engine: &MeteringEngine,
) -> Result<(), Box<dyn std::error::Error>> {
    match args.client {
        Some(client) => print_json(&engine.rollover.rollover(&client).await?),
        None => print_json(&engine.rollover.sweep().await?),
    }
}

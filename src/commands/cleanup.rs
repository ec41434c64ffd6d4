use super::print_json;
use crate::engine::MeteringEngine;
use clap::Args;

#[derive(Args)]
pub struct CleanupArgs {
    /// Override `jobs.generation_cleanup.retention_days`
    #[arg(long)]
    retention_days: Option<u32>,
    /// Count what would be deleted without deleting
    #[arg(long)]
    dry_run: bool,
}

pub async fn handle_cleanup_command(
    args: CleanupArgs,
    engine: &MeteringEngine,
) -> Result<(), Box<dyn std::error::Error>> {
    let days = args
        .retention_days
        .unwrap_or(engine.config.jobs.generation_cleanup.retention_days);

    let report = engine
        .dedup
        .prune(
            chrono::Duration::days(i64::from(days)),
            engine.clock.now(),
            args.dry_run,
        )
        .await?;
    print_json(&report)
}

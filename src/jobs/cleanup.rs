use super::{GenerationCleanupConfig, Job, JobResult};
use crate::clock::Clock;
use crate::error::AppError;
use crate::metering::GenerationDeduplicator;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Prunes the processed generation ledger
pub struct GenerationCleanupJob {
    dedup: GenerationDeduplicator,
    config: GenerationCleanupConfig,
    clock: Arc<dyn Clock>,
}

impl GenerationCleanupJob {
    pub fn new(
        dedup: GenerationDeduplicator,
        config: GenerationCleanupConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            dedup,
            config,
            clock,
        }
    }
}

#[async_trait]
impl Job for GenerationCleanupJob {
    fn name(&self) -> &str {
        "generation_cleanup"
    }

    async fn execute(&self) -> Result<JobResult, AppError> {
        info!(
            "Cleaning up processed generations older than {} days",
            self.config.retention_days
        );

        let report = self
            .dedup
            .prune(self.config.retention(), self.clock.now(), false)
            .await?;

        Ok(JobResult::success_with_count(report.deleted))
    }
}

use super::{Job, JobResult};
use crate::error::AppError;
use crate::metering::DailyRolloverEngine;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

/// Closes every live counter left over from a previous day
pub struct RolloverSweepJob {
    rollover: Arc<DailyRolloverEngine>,
}

impl RolloverSweepJob {
    pub fn new(rollover: Arc<DailyRolloverEngine>) -> Self {
        Self { rollover }
    }
}

#[async_trait]
impl Job for RolloverSweepJob {
    fn name(&self) -> &str {
        "rollover_sweep"
    }

    async fn execute(&self) -> Result<JobResult, AppError> {
        let report = self.rollover.sweep().await?;

        if report.failures.is_empty() {
            return Ok(JobResult::success_with_count(report.rolled_over as u64));
        }

        for (client_org_id, reason) in &report.failures {
            error!(client_org_id = %client_org_id, "Rollover left for the next sweep: {}", reason);
        }
        Ok(JobResult {
            success: false,
            message: format!(
                "Rolled over {} of {} stale counters, {} failed",
                report.rolled_over,
                report.examined,
                report.failures.len()
            ),
            items_processed: report.rolled_over as u64,
        })
    }
}

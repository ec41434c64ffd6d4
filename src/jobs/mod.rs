pub mod cleanup;
pub mod exchange_refresh;
pub mod rollover_sweep;
pub mod scheduler;

use crate::error::AppError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use cleanup::GenerationCleanupJob;
pub use exchange_refresh::ExchangeRateRefreshJob;
pub use rollover_sweep::RolloverSweepJob;
pub use scheduler::JobScheduler;

/// Configuration for the job system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Enable/disable internal job scheduler
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_rollover_sweep")]
    pub rollover_sweep: ScheduleConfig,

    #[serde(default)]
    pub generation_cleanup: GenerationCleanupConfig,

    #[serde(default = "default_exchange_rate_refresh")]
    pub exchange_rate_refresh: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Cron schedule expression (sec min hour dom month dow)
    pub schedule: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationCleanupConfig {
    #[serde(default = "default_cleanup_schedule")]
    pub schedule: String,
    /// How long processed generation ids are kept
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Longest time a provider may redeliver an event; retention never
    /// goes below this
    #[serde(default = "default_retry_window_hours")]
    pub retry_window_hours: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_rollover_sweep() -> ScheduleConfig {
    ScheduleConfig {
        schedule: "0 5 0 * * *".to_string(), // Daily at 00:05
    }
}

fn default_exchange_rate_refresh() -> ScheduleConfig {
    ScheduleConfig {
        schedule: "0 30 8 * * *".to_string(), // After the 08:15 publication
    }
}

fn default_cleanup_schedule() -> String {
    "0 0 3 * * *".to_string() // Daily at 3 AM
}

fn default_retention_days() -> u32 {
    90
}

fn default_retry_window_hours() -> u32 {
    72
}

impl Default for GenerationCleanupConfig {
    fn default() -> Self {
        Self {
            schedule: default_cleanup_schedule(),
            retention_days: default_retention_days(),
            retry_window_hours: default_retry_window_hours(),
        }
    }
}

impl GenerationCleanupConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    pub fn retry_window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.retry_window_hours))
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            rollover_sweep: default_rollover_sweep(),
            generation_cleanup: GenerationCleanupConfig::default(),
            exchange_rate_refresh: default_exchange_rate_refresh(),
        }
    }
}

/// Result of job execution
#[derive(Debug, Clone)]
pub struct JobResult {
    pub success: bool,
    pub message: String,
    pub items_processed: u64,
}

impl JobResult {
    pub fn success_with_count(count: u64) -> Self {
        Self {
            success: true,
            message: format!("Successfully processed {count} items"),
            items_processed: count,
        }
    }

    pub fn success() -> Self {
        Self {
            success: true,
            message: "Job completed successfully".to_string(),
            items_processed: 0,
        }
    }

    pub fn failure(message: String) -> Self {
        Self {
            success: false,
            message,
            items_processed: 0,
        }
    }
}

/// Trait for executable jobs
#[async_trait]
pub trait Job: Send + Sync {
    /// Get the job name for logging and identification
    fn name(&self) -> &str;

    /// Execute the job and return the result
    async fn execute(&self) -> Result<JobResult, AppError>;
}

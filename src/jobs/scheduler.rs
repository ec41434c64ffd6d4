use super::{Job, JobsConfig};
use crate::error::AppError;
use chrono::Utc;
use cron::Schedule;
use std::{str::FromStr, sync::Arc};
use tokio::{
    sync::{RwLock, broadcast, watch},
    task::JoinHandle,
    time::{Duration, Instant, sleep_until},
};
use tracing::{error, info, warn};

/// Job scheduler that runs each registered job on its cron schedule
pub struct JobScheduler {
    config: JobsConfig,
    handles: Arc<RwLock<Vec<JoinHandle<()>>>>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_coordinator: Option<watch::Receiver<bool>>,
}

impl JobScheduler {
    pub fn new(config: JobsConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            config,
            handles: Arc::new(RwLock::new(Vec::new())),
            shutdown_tx,
            shutdown_coordinator: None,
        }
    }

    /// Create JobScheduler with graceful shutdown integration
    pub fn with_shutdown_coordinator(
        config: JobsConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            config,
            handles: Arc::new(RwLock::new(Vec::new())),
            shutdown_tx,
            shutdown_coordinator: Some(shutdown_rx),
        }
    }

    /// Start the job scheduler with registered jobs
    pub async fn start(&mut self, jobs: Vec<Arc<dyn Job>>) -> Result<(), AppError> {
        if !self.config.enabled {
            info!("Job scheduler disabled in configuration");
            return Ok(());
        }

        info!("Starting job scheduler with {} jobs", jobs.len());

        let mut handles = self.handles.write().await;
        for job in jobs {
            let handle = self.spawn_job_with_schedule(job)?;
            handles.push(handle);
        }

        info!("Job scheduler started successfully");
        Ok(())
    }

    /// Stop the job scheduler and wait for running jobs to finish
    pub async fn stop(&mut self) {
        info!("Stopping job scheduler...");

        if let Err(e) = self.shutdown_tx.send(()) {
            // No receivers: nothing was started
            warn!("Failed to send shutdown signal: {}", e);
        }

        let mut handles = self.handles.write().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                error!("Job handle failed during shutdown: {}", e);
            }
        }

        info!("Job scheduler stopped");
    }

    /// Spawn a job with its configured schedule
    fn spawn_job_with_schedule(&self, job: Arc<dyn Job>) -> Result<JoinHandle<()>, AppError> {
        let cron = self.get_schedule_for_job(job.name())?;
        let schedule = parse_schedule(&cron)?;

        let job_name = job.name().to_string();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut coordinator_rx = self.shutdown_coordinator.clone();

        let handle = tokio::spawn(async move {
            info!("Job '{}' scheduled with '{}'", job_name, cron);

            loop {
                let wait = match duration_until_next(&schedule) {
                    Some(wait) => wait,
                    None => {
                        warn!("Job '{}' has no upcoming execution", job_name);
                        break;
                    }
                };

                tokio::select! {
                    _ = sleep_until(Instant::now() + wait) => {
                        info!("Executing job '{}'", job_name);

                        match job.execute().await {
                            Ok(result) => {
                                if result.success {
                                    info!("Job '{}' completed: {}", job_name, result.message);
                                } else {
                                    warn!("Job '{}' failed: {}", job_name, result.message);
                                }
                            }
                            Err(e) => {
                                error!("Job '{}' execution error: {}", job_name, e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Job '{}' received internal shutdown signal", job_name);
                        break;
                    }
                    _ = async {
                        if let Some(ref mut coord_rx) = coordinator_rx {
                            coord_rx.changed().await.ok();
                            *coord_rx.borrow()
                        } else {
                            false
                        }
                    }, if coordinator_rx.is_some() => {
                        info!("Job '{}' received global shutdown signal", job_name);
                        break;
                    }
                }
            }

            info!("Job '{}' stopped", job_name);
        });

        Ok(handle)
    }

    /// Get the schedule configuration for a specific job
    fn get_schedule_for_job(&self, job_name: &str) -> Result<String, AppError> {
        match job_name {
            "rollover_sweep" => Ok(self.config.rollover_sweep.schedule.clone()),
            "generation_cleanup" => Ok(self.config.generation_cleanup.schedule.clone()),
            "exchange_rate_refresh" => Ok(self.config.exchange_rate_refresh.schedule.clone()),
            _ => Err(AppError::Internal(format!("Unknown job: {job_name}"))),
        }
    }
}

/// Parse a 6-field cron expression (sec min hour day month dow)
fn parse_schedule(cron: &str) -> Result<Schedule, AppError> {
    Schedule::from_str(cron)
        .map_err(|e| AppError::Internal(format!("Invalid cron expression '{cron}': {e}")))
}

/// Time left until the schedule's next firing, recomputed on every call so
/// long sleeps never drift from wall-clock time
fn duration_until_next(schedule: &Schedule) -> Option<Duration> {
    let next = schedule.upcoming(Utc).next()?;
    Some((next - Utc::now()).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{GenerationCleanupConfig, JobResult, ScheduleConfig};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn create_test_config() -> JobsConfig {
        JobsConfig {
            enabled: true,
            rollover_sweep: ScheduleConfig {
                schedule: "0 5 0 * * *".to_string(),
            },
            generation_cleanup: GenerationCleanupConfig {
                schedule: "0 0 3 * * *".to_string(),
                ..Default::default()
            },
            exchange_rate_refresh: ScheduleConfig {
                schedule: "0 30 8 * * *".to_string(),
            },
        }
    }

    struct CountingJob {
        name: &'static str,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self) -> Result<JobResult, AppError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(JobResult::success())
        }
    }

    #[test]
    fn test_valid_cron_expressions() {
        let test_cases = vec![
            "0 0 * * * *",     // Every hour
            "0 0 2 * * *",     // Daily at 2 AM
            "0 30 14 * * MON", // Every Monday at 2:30 PM
            "0 0 0 1 * *",     // Monthly on 1st
            "0 */15 * * * *",  // Every 15 minutes
            "0 0 9-17 * * 1-5",
            "0 30 2 1,15 * *",
        ];

        for cron_expr in test_cases {
            let schedule = parse_schedule(cron_expr);
            assert!(
                schedule.is_ok(),
                "Failed to parse valid cron expression '{}': {:?}",
                cron_expr,
                schedule.err()
            );
            let wait = duration_until_next(&schedule.unwrap()).unwrap();
            assert!(wait <= Duration::from_secs(32 * 24 * 3600));
        }
    }

    #[test]
    fn test_invalid_cron_expressions() {
        let invalid_cases = vec!["", "invalid", "60 * * * *", "0 25 * * *", "0 0 * 13 *"];

        for cron_expr in invalid_cases {
            assert!(
                parse_schedule(cron_expr).is_err(),
                "Should fail for invalid cron expression: {cron_expr}"
            );
        }
    }

    #[test]
    fn test_get_schedule_for_job() {
        let scheduler = JobScheduler::new(create_test_config());

        assert_eq!(
            scheduler.get_schedule_for_job("rollover_sweep").unwrap(),
            "0 5 0 * * *"
        );
        assert_eq!(
            scheduler.get_schedule_for_job("generation_cleanup").unwrap(),
            "0 0 3 * * *"
        );
        assert_eq!(
            scheduler.get_schedule_for_job("exchange_rate_refresh").unwrap(),
            "0 30 8 * * *"
        );
        assert!(scheduler.get_schedule_for_job("unknown_job").is_err());
    }

    #[tokio::test]
    async fn test_unknown_job_fails_start() {
        let mut scheduler = JobScheduler::new(create_test_config());
        let job = Arc::new(CountingJob {
            name: "mystery",
            runs: Arc::new(AtomicUsize::new(0)),
        });

        assert!(scheduler.start(vec![job]).await.is_err());
    }

    #[tokio::test]
    async fn test_every_second_schedule_runs_and_stops() {
        let mut config = create_test_config();
        config.rollover_sweep.schedule = "* * * * * *".to_string();
        let runs = Arc::new(AtomicUsize::new(0));
        let job = Arc::new(CountingJob {
            name: "rollover_sweep",
            runs: runs.clone(),
        });

        let mut scheduler = JobScheduler::new(config);
        scheduler.start(vec![job]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.stop().await;

        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 1, "job ran {seen} times");
    }

    #[tokio::test]
    async fn test_disabled_scheduler_starts_nothing() {
        let mut config = create_test_config();
        config.enabled = false;
        config.rollover_sweep.schedule = "* * * * * *".to_string();
        let runs = Arc::new(AtomicUsize::new(0));
        let job = Arc::new(CountingJob {
            name: "rollover_sweep",
            runs: runs.clone(),
        });

        let mut scheduler = JobScheduler::new(config);
        scheduler.start(vec![job]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        scheduler.stop().await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}

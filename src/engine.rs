use crate::{
    cache::CacheManager,
    clock::{Clock, SystemClock},
    config::Config,
    database::{DatabaseManager, DatabaseManagerImpl},
    error::AppError,
    exchange::{ExchangeRateProvider, NbpRateSource, RateSource},
    jobs::{
        ExchangeRateRefreshJob, GenerationCleanupJob, Job, JobScheduler, RolloverSweepJob,
    },
    metering::{
        ClientLocks, DailyRolloverEngine, GenerationDeduplicator, LiveCounterStore,
        NormalizationPolicy, UsageRecorder, UsageStatsQueryService,
    },
    metrics,
    shutdown::{DatabaseShutdown, JobSchedulerShutdown, ShutdownCoordinator, ShutdownManager},
};
use chrono::{FixedOffset, Offset, Utc};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Every metering component, wired once and shared by the daemon and the CLI
#[derive(Clone)]
pub struct MeteringEngine {
    pub config: Arc<Config>,
    pub database: Arc<dyn DatabaseManager>,
    pub cache: Arc<CacheManager>,
    pub clock: Arc<dyn Clock>,
    pub locks: Arc<ClientLocks>,
    pub recorder: Arc<UsageRecorder>,
    pub rollover: Arc<DailyRolloverEngine>,
    pub query: Arc<UsageStatsQueryService>,
    pub dedup: GenerationDeduplicator,
    pub exchange: Arc<ExchangeRateProvider>,
    pub shutdown_coordinator: Arc<ShutdownCoordinator>,
}

impl MeteringEngine {
    pub async fn from_config(config: Config) -> Result<Self, AppError> {
        let cache = Arc::new(CacheManager::new_from_config(&config.cache).await?);
        info!("Cache backend: {}", cache.backend_type());

        let database: Arc<dyn DatabaseManager> =
            Arc::new(DatabaseManagerImpl::new_from_config(&config.database, cache.clone()).await?);

        let clock: Arc<dyn Clock> = Arc::new(SystemClock::with_offset_minutes(
            config.metering.business_day_offset_minutes,
        ));

        let rate_source: Arc<dyn RateSource> = Arc::new(
            NbpRateSource::new(&config.exchange_rate)
                .map_err(|e| AppError::Internal(format!("Failed to build rate client: {e}")))?,
        );

        Self::with_components(config, database, clock, rate_source)
    }

    /// Wire the engine around externally built resources
    pub fn with_components(
        config: Config,
        database: Arc<dyn DatabaseManager>,
        clock: Arc<dyn Clock>,
        rate_source: Arc<dyn RateSource>,
    ) -> Result<Self, AppError> {
        let cache = database.cache_manager();
        let connection = database.connection().clone();
        let policy = NormalizationPolicy::from_config(&config.metering)?;
        let locks = Arc::new(ClientLocks::new());

        let dedup = GenerationDeduplicator::new(
            database.generations(),
            &cache,
            config.jobs.generation_cleanup.retry_window(),
        );

        let store = || {
            LiveCounterStore::new(
                database.live_counters(),
                database.daily_usage(),
                locks.clone(),
            )
        };

        let rollover = Arc::new(DailyRolloverEngine::new(
            connection.clone(),
            database.live_counters(),
            database.daily_usage(),
            locks.clone(),
            clock.clone(),
        ));

        let recorder = Arc::new(UsageRecorder::new(
            connection.clone(),
            database.clients(),
            dedup.clone(),
            store(),
            clock.clone(),
            policy,
        ));

        let query = Arc::new(UsageStatsQueryService::new(
            connection,
            database.clients(),
            store(),
            database.daily_usage(),
            rollover.clone(),
            clock.clone(),
        ));

        let exchange = Arc::new(ExchangeRateProvider::new(
            config.exchange_rate.clone(),
            rate_source,
            &cache,
            clock.clone(),
            business_day_offset(config.metering.business_day_offset_minutes),
        ));

        Ok(Self {
            config: Arc::new(config),
            database,
            cache,
            clock,
            locks,
            recorder,
            rollover,
            query,
            dedup,
            exchange,
            shutdown_coordinator: Arc::new(ShutdownCoordinator::new()),
        })
    }

    /// Scheduled jobs, named as in `jobs` config
    pub fn jobs(&self) -> Vec<Arc<dyn Job>> {
        vec![
            Arc::new(RolloverSweepJob::new(self.rollover.clone())),
            Arc::new(GenerationCleanupJob::new(
                self.dedup.clone(),
                self.config.jobs.generation_cleanup.clone(),
                self.clock.clone(),
            )),
            Arc::new(ExchangeRateRefreshJob::new(self.exchange.clone())),
        ]
    }

    /// Run the daemon until SIGINT or SIGTERM
    pub async fn run(&self) -> Result<(), AppError> {
        self.database.health_check().await?;
        if self.config.database.migration_on_startup {
            self.database.migrate().await?;
        }

        let _metrics_handle = metrics::init_metrics(&self.config.metrics)?;

        // Counters left stale by downtime are closed before new events land
        match self.rollover.sweep().await {
            Ok(report) if !report.failures.is_empty() => warn!(
                failures = report.failures.len(),
                "Startup rollover sweep left stale counters"
            ),
            Ok(_) => {}
            Err(e) => warn!("Startup rollover sweep failed: {}", e),
        }

        let mut shutdown_manager = ShutdownManager::new(Duration::from_secs(30));

        let scheduler = Arc::new(Mutex::new(JobScheduler::with_shutdown_coordinator(
            self.config.jobs.clone(),
            self.shutdown_coordinator.subscribe(),
        )));
        scheduler.lock().await.start(self.jobs()).await?;

        shutdown_manager.register(JobSchedulerShutdown::new(scheduler));
        shutdown_manager.register(DatabaseShutdown::new(self.database.clone()));

        info!("Usage metering engine running");
        self.shutdown_coordinator.wait_for_shutdown_signal().await;

        shutdown_manager.shutdown_all().await;
        info!("Usage metering engine stopped");
        Ok(())
    }
}

fn business_day_offset(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| Utc.fix())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEngineBuilder;

    #[test]
    fn test_business_day_offset() {
        assert_eq!(business_day_offset(0).local_minus_utc(), 0);
        assert_eq!(business_day_offset(120).local_minus_utc(), 7200);
        assert_eq!(business_day_offset(100_000).local_minus_utc(), 0);
    }

    #[tokio::test]
    async fn test_jobs_match_scheduler_names() {
        let harness = TestEngineBuilder::new().build().await;
        let names: Vec<String> = harness
            .engine
            .jobs()
            .iter()
            .map(|job| job.name().to_string())
            .collect();

        assert_eq!(
            names,
            vec!["rollover_sweep", "generation_cleanup", "exchange_rate_refresh"]
        );
    }
}

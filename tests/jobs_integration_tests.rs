mod common;

use common::{acme_engine, date};
use usage_metering::jobs::{
    ExchangeRateRefreshJob, GenerationCleanupJob, Job, RolloverSweepJob,
};
use usage_metering::metering::RecordOutcome;
use usage_metering::test_utils::usage_event;

#[tokio::test]
async fn test_rollover_sweep_job() {
    let harness = acme_engine(date(2024, 3, 31)).await;
    harness.create_client("globex", "2.0").await;
    for (id, client) in [("a1", "acme"), ("g1", "globex")] {
        harness
            .record(&usage_event(id, client, "alice", "m", 10, 10, "0.01"))
            .await;
    }

    harness.set_date(date(2024, 4, 1));
    let job = RolloverSweepJob::new(harness.engine.rollover.clone());
    assert_eq!(job.name(), "rollover_sweep");

    let result = job.execute().await.unwrap();
    assert!(result.success);
    assert_eq!(result.items_processed, 2);

    // nothing left to do on a second run
    let result = job.execute().await.unwrap();
    assert_eq!(result.items_processed, 0);
}

#[tokio::test]
async fn test_generation_cleanup_job_keeps_retry_window() {
    let harness = acme_engine(date(2024, 1, 1)).await;
    harness
        .record(&usage_event("old", "acme", "alice", "m", 10, 10, "0.01"))
        .await;

    harness.set_date(date(2024, 4, 30));
    harness
        .record(&usage_event("fresh", "acme", "alice", "m", 10, 10, "0.01"))
        .await;

    let mut config = harness.engine.config.jobs.generation_cleanup.clone();
    config.retention_days = 0;
    let job = GenerationCleanupJob::new(
        harness.engine.dedup.clone(),
        config,
        harness.engine.clock.clone(),
    );

    let result = job.execute().await.unwrap();
    assert!(result.success);
    assert_eq!(result.items_processed, 1);

    // retention is clamped to the retry window, so the recent generation stays deduplicated
    assert_eq!(
        harness
            .record(&usage_event("fresh", "acme", "alice", "m", 10, 10, "0.01"))
            .await,
        RecordOutcome::Duplicate
    );
}

#[tokio::test]
async fn test_exchange_refresh_job_reports_fallback() {
    let harness = acme_engine(date(2024, 4, 2)).await;
    let job = ExchangeRateRefreshJob::new(harness.engine.exchange.clone());

    let result = job.execute().await.unwrap();
    assert!(!result.success);
    assert!(result.message.contains("Fallback"));
}

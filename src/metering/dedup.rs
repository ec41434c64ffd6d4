//! Exactly-once ledger of processed generation ids.
//!
//! The primary key on `processed_generations` is the only authority. The
//! cache in front of it only ever remembers ids that are committed, so losing
//! it costs a database round-trip and nothing else.

use super::units::to_nanos;
use crate::cache::{CacheManager, TypedCache, typed_cache};
use crate::database::ProcessedGenerationsDao;
use crate::database::entities::ProcessedGeneration;
use crate::error::MeteringResult;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::ConnectionTrait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[typed_cache(ttl = 86400, prefix = "processed_generation")]
struct ProcessedMarker {
    client_org_id: String,
}

/// A generation about to be recorded
#[derive(Debug, Clone)]
pub struct ProcessedEntry<'a> {
    pub generation_id: &'a str,
    pub client_org_id: &'a str,
    pub date: NaiveDate,
    pub total_cost: Decimal,
    pub total_tokens: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub cutoff: DateTime<Utc>,
    pub deleted: u64,
    /// The requested retention was shorter than the retry window
    pub clamped: bool,
    pub dry_run: bool,
}

#[derive(Clone)]
pub struct GenerationDeduplicator {
    dao: ProcessedGenerationsDao,
    cache: TypedCache<ProcessedMarker>,
    retry_window: Duration,
}

impl GenerationDeduplicator {
    pub fn new(dao: ProcessedGenerationsDao, cache: &CacheManager, retry_window: Duration) -> Self {
        Self {
            dao,
            cache: cache.cache(),
            retry_window,
        }
    }

    pub fn retry_window(&self) -> Duration {
        self.retry_window
    }

    /// Insert the ledger row on `conn`. `false` means the id was already
    /// recorded and nothing was written.
    ///
    /// Call `remember` once the surrounding transaction has committed.
    pub async fn try_mark_processed_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        entry: &ProcessedEntry<'_>,
        now: DateTime<Utc>,
    ) -> MeteringResult<bool> {
        let record = ProcessedGeneration {
            generation_id: entry.generation_id.to_string(),
            client_org_id: entry.client_org_id.to_string(),
            processed_date: entry.date,
            processed_at: now,
            total_cost_nanos: to_nanos(entry.total_cost)?,
            total_tokens: entry.total_tokens,
        };

        let inserted = self.dao.insert(conn, &record).await?;
        if !inserted {
            debug!(generation_id = entry.generation_id, "Generation already processed");
        }
        Ok(inserted)
    }

    /// Standalone check-and-insert, committed immediately
    pub async fn try_mark_processed(
        &self,
        conn: &impl ConnectionTrait,
        entry: &ProcessedEntry<'_>,
        now: DateTime<Utc>,
    ) -> MeteringResult<bool> {
        let inserted = self.try_mark_processed_in(conn, entry, now).await?;
        if inserted {
            self.remember(entry.generation_id, entry.client_org_id).await;
        }
        Ok(inserted)
    }

    /// Record a committed id in the fast-path cache
    pub async fn remember(&self, generation_id: &str, client_org_id: &str) {
        let marker = ProcessedMarker {
            client_org_id: client_org_id.to_string(),
        };
        if let Err(e) = self.cache.set(generation_id, &marker).await {
            warn!(generation_id, "Failed to cache processed generation: {}", e);
        }
    }

    /// Existence check with no side effects on the ledger
    pub async fn is_processed(&self, generation_id: &str) -> MeteringResult<bool> {
        match self.cache.exists(generation_id).await {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(e) => warn!(generation_id, "Processed generation cache lookup failed: {}", e),
        }

        match self.dao.find(generation_id).await? {
            Some(record) => {
                self.remember(&record.generation_id, &record.client_org_id).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete ledger rows older than `retention`, which is never allowed to
    /// be shorter than the retry window
    pub async fn prune(
        &self,
        retention: Duration,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> MeteringResult<PruneReport> {
        let clamped = retention < self.retry_window;
        let effective = if clamped {
            warn!(
                requested_hours = retention.num_hours(),
                retry_window_hours = self.retry_window.num_hours(),
                "Retention is shorter than the retry window, using the retry window"
            );
            self.retry_window
        } else {
            retention
        };

        let cutoff = now - effective;
        let deleted = if dry_run {
            self.dao.count_processed_before(cutoff).await?
        } else {
            self.dao.delete_processed_before(cutoff).await?
        };

        info!(%cutoff, deleted, dry_run, "Pruned processed generation ledger");
        Ok(PruneReport {
            cutoff,
            deleted,
            clamped,
            dry_run,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseConfig, DatabaseManager, DatabaseManagerImpl};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn setup() -> (DatabaseManagerImpl, GenerationDeduplicator) {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..Default::default()
        };
        let cache = Arc::new(CacheManager::new_memory());
        let db = DatabaseManagerImpl::new_from_config(&config, cache.clone())
            .await
            .unwrap();
        db.migrate().await.unwrap();
        let dedup = GenerationDeduplicator::new(db.generations(), &cache, Duration::hours(72));
        (db, dedup)
    }

    fn entry(generation_id: &str) -> ProcessedEntry<'_> {
        ProcessedEntry {
            generation_id,
            client_org_id: "acme",
            date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            total_cost: dec!(0.0125),
            total_tokens: 1500,
        }
    }

    #[tokio::test]
    async fn test_mark_processed_once() {
        let (db, dedup) = setup().await;
        let now = Utc::now();

        assert!(!dedup.is_processed("gen-1").await.unwrap());
        assert!(dedup.try_mark_processed(db.connection(), &entry("gen-1"), now).await.unwrap());
        assert!(!dedup.try_mark_processed(db.connection(), &entry("gen-1"), now).await.unwrap());
        assert!(dedup.is_processed("gen-1").await.unwrap());
        assert!(!dedup.is_processed("gen-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_is_processed_survives_cache_loss() {
        let (db, dedup) = setup().await;
        dedup
            .try_mark_processed(db.connection(), &entry("gen-1"), Utc::now())
            .await
            .unwrap();

        // A deduplicator with a fresh, empty cache still sees the ledger row
        let cold = GenerationDeduplicator::new(
            db.generations(),
            &CacheManager::new_memory(),
            Duration::hours(72),
        );
        assert!(cold.is_processed("gen-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_rolled_back_mark_is_not_remembered() {
        use sea_orm::TransactionTrait;

        let (db, dedup) = setup().await;
        let txn = db.connection().begin().await.unwrap();
        assert!(dedup.try_mark_processed_in(&txn, &entry("gen-1"), Utc::now()).await.unwrap());
        txn.rollback().await.unwrap();

        assert!(!dedup.is_processed("gen-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_respects_retention_and_retry_window() {
        let (db, dedup) = setup().await;
        let now = Utc::now();

        dedup
            .try_mark_processed(db.connection(), &entry("old"), now - Duration::days(100))
            .await
            .unwrap();
        dedup
            .try_mark_processed(db.connection(), &entry("recent"), now - Duration::hours(48))
            .await
            .unwrap();

        let preview = dedup.prune(Duration::days(90), now, true).await.unwrap();
        assert_eq!(preview.deleted, 1);
        assert!(preview.dry_run);
        assert!(!preview.clamped);

        // One hour of retention is clamped to the 72h retry window
        let report = dedup.prune(Duration::hours(1), now, false).await.unwrap();
        assert!(report.clamped);
        assert_eq!(report.cutoff, now - Duration::hours(72));
        assert_eq!(report.deleted, 1);

        let cold = GenerationDeduplicator::new(
            db.generations(),
            &CacheManager::new_memory(),
            Duration::hours(72),
        );
        assert!(!cold.is_processed("old").await.unwrap());
        assert!(cold.is_processed("recent").await.unwrap());
    }
}

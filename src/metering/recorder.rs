//! The recording pipeline: dedup, cost, live counter.
//!
//! The ledger row and the counter increment commit in the same transaction,
//! so an event is either fully billed or not at all and a retry is always
//! safe.

use super::calculator::{ClientContext, GenerationCost, generation_cost};
use super::counters::{CounterUsage, LiveCounterStore};
use super::dedup::{GenerationDeduplicator, ProcessedEntry};
use super::event::{NormalizationPolicy, RawUsageEvent, UsageEvent};
use super::units::to_nanos;
use crate::clock::Clock;
use crate::database::{CachedClientOrganizationsDao, CounterDelta};
use crate::error::{MeteringError, MeteringResult};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedUsage {
    pub generation_id: String,
    pub client_org_id: String,
    pub date: NaiveDate,
    pub cost: GenerationCost,
    /// A stale counter for this day was closed before applying
    pub closed_day: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Applied(AppliedUsage),
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestFailure {
    pub generation_id: Option<String>,
    pub kind: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub applied: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failures: Vec<IngestFailure>,
    pub raw_cost: Decimal,
    pub markup_cost: Decimal,
    pub tokens: i64,
}

impl IngestReport {
    /// Count an event that could not be recorded
    pub fn skip(&mut self, generation_id: Option<String>, err: &MeteringError) {
        crate::metrics::event_skipped(err.kind());
        self.skipped += 1;
        self.failures.push(IngestFailure {
            generation_id,
            kind: err.kind(),
            reason: err.to_string(),
        });
    }
}

pub struct UsageRecorder {
    db: DatabaseConnection,
    clients: CachedClientOrganizationsDao,
    dedup: GenerationDeduplicator,
    counters: LiveCounterStore,
    clock: Arc<dyn Clock>,
    policy: NormalizationPolicy,
}

impl UsageRecorder {
    pub fn new(
        db: DatabaseConnection,
        clients: CachedClientOrganizationsDao,
        dedup: GenerationDeduplicator,
        counters: LiveCounterStore,
        clock: Arc<dyn Clock>,
        policy: NormalizationPolicy,
    ) -> Self {
        Self {
            db,
            clients,
            dedup,
            counters,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &NormalizationPolicy {
        &self.policy
    }

    pub fn normalize(&self, raw: RawUsageEvent) -> MeteringResult<UsageEvent> {
        UsageEvent::try_from_raw(raw, &self.policy)
    }

    /// Billing view of a client, failing for unknown or misconfigured ones
    pub async fn client_context(&self, client_org_id: &str) -> MeteringResult<ClientContext> {
        let client = self
            .clients
            .find_by_id(client_org_id)
            .await?
            .ok_or_else(|| MeteringError::ClientNotFound(client_org_id.to_string()))?;
        ClientContext::try_from(&client)
    }

    /// Bill one event against today's live counter
    pub async fn record(&self, event: &UsageEvent) -> MeteringResult<RecordOutcome> {
        if self.dedup.is_processed(&event.generation_id).await? {
            debug!(generation_id = %event.generation_id, "Skipping already processed generation");
            crate::metrics::event_duplicate();
            return Ok(RecordOutcome::Duplicate);
        }

        let client = self.client_context(&event.client_org_id).await?;
        let cost = generation_cost(event, &client)?;
        let delta = CounterDelta {
            input_tokens: cost.input_tokens,
            output_tokens: cost.output_tokens,
            requests: 1,
            raw_cost_nanos: to_nanos(cost.raw_cost)?,
            markup_cost_nanos: to_nanos(cost.markup_cost)?,
        };

        let _guard = self.counters.locks().lock(&event.client_org_id).await;
        let date = self.clock.today();
        let now = self.clock.now();

        let txn = self.db.begin().await?;

        let entry = ProcessedEntry {
            generation_id: &event.generation_id,
            client_org_id: &event.client_org_id,
            date,
            total_cost: cost.markup_cost,
            total_tokens: cost.total_tokens,
        };
        if !self.dedup.try_mark_processed_in(&txn, &entry, now).await? {
            txn.rollback().await?;
            crate::metrics::event_duplicate();
            return Ok(RecordOutcome::Duplicate);
        }

        let usage = CounterUsage {
            client_org_id: &event.client_org_id,
            user_id: &event.user_id,
            model: &event.model,
            provider: &event.provider,
            date,
            delta,
        };
        // dropping the transaction on error rolls back the ledger row too
        let outcome = self.counters.apply_usage(&txn, &usage, now).await?;
        txn.commit().await?;

        self.dedup
            .remember(&event.generation_id, &event.client_org_id)
            .await;
        crate::metrics::event_applied();

        Ok(RecordOutcome::Applied(AppliedUsage {
            generation_id: event.generation_id.clone(),
            client_org_id: event.client_org_id.clone(),
            date,
            cost,
            closed_day: outcome.closed_day,
        }))
    }

    /// Record every event; failures are counted and skipped
    pub async fn record_batch(&self, events: &[UsageEvent]) -> IngestReport {
        let mut report = IngestReport::default();
        for event in events {
            self.record_into(event, &mut report).await;
        }
        info!(
            applied = report.applied,
            duplicates = report.duplicates,
            skipped = report.skipped,
            "Recorded usage batch"
        );
        report
    }

    /// Normalize and record raw payloads. Payloads that fail to normalize
    /// count as skipped.
    pub async fn record_raw_batch(&self, raw_events: Vec<RawUsageEvent>) -> IngestReport {
        let mut report = IngestReport::default();
        for raw in raw_events {
            let generation_id = raw.generation_id.clone();
            match self.normalize(raw) {
                Ok(event) => self.record_into(&event, &mut report).await,
                Err(e) => {
                    warn!(generation_id = ?generation_id, "Skipping malformed usage event: {}", e);
                    report.skip(generation_id, &e);
                }
            }
        }
        info!(
            applied = report.applied,
            duplicates = report.duplicates,
            skipped = report.skipped,
            "Recorded raw usage batch"
        );
        report
    }

    async fn record_into(&self, event: &UsageEvent, report: &mut IngestReport) {
        match self.record(event).await {
            Ok(RecordOutcome::Applied(applied)) => {
                report.applied += 1;
                report.raw_cost += applied.cost.raw_cost;
                report.markup_cost += applied.cost.markup_cost;
                report.tokens += applied.cost.total_tokens;
            }
            Ok(RecordOutcome::Duplicate) => report.duplicates += 1,
            Err(e) => {
                warn!(
                    generation_id = %event.generation_id,
                    client_org_id = %event.client_org_id,
                    "Skipping usage event: {}",
                    e
                );
                report.skip(Some(event.generation_id.clone()), &e);
            }
        }
    }
}

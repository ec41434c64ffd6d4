//! Live (current-day) counters per client, with per-user and per-model
//! breakdowns kept alongside so the day can be closed without re-reading
//! the ledger.

use super::rollover::close_day;
use super::types::UsageTotals;
use crate::database::entities::{LiveCounterRecord, ModelLiveCounterRecord, UserLiveCounterRecord};
use crate::database::{CounterDelta, DailyUsageDao, DatabaseError, LiveCountersDao};
use crate::error::{MeteringError, MeteringResult};
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use sea_orm::ConnectionTrait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error};

/// One async mutex per client organization.
///
/// Taken by the apply path and by rollover, always before a transaction is
/// opened. Clients never contend with each other.
#[derive(Default)]
pub struct ClientLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ClientLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, client_org_id: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(client_org_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Usage to add to a client's live counter
#[derive(Debug, Clone)]
pub struct CounterUsage<'a> {
    pub client_org_id: &'a str,
    pub user_id: &'a str,
    pub model: &'a str,
    pub provider: &'a str,
    pub date: NaiveDate,
    pub delta: CounterDelta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Set when a stale counter for this day was closed first
    pub closed_day: Option<NaiveDate>,
}

/// Current state of a client's live counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub client_org_id: String,
    pub date: NaiveDate,
    pub totals: UsageTotals,
    pub updated_at: DateTime<Utc>,
}

impl From<&LiveCounterRecord> for CounterSnapshot {
    fn from(record: &LiveCounterRecord) -> Self {
        Self {
            client_org_id: record.client_org_id.clone(),
            date: record.counter_date,
            totals: UsageTotals::from(record),
            updated_at: record.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct LiveCounterStore {
    counters: LiveCountersDao,
    daily: DailyUsageDao,
    locks: Arc<ClientLocks>,
}

impl LiveCounterStore {
    pub fn new(counters: LiveCountersDao, daily: DailyUsageDao, locks: Arc<ClientLocks>) -> Self {
        Self {
            counters,
            daily,
            locks,
        }
    }

    pub fn locks(&self) -> &Arc<ClientLocks> {
        &self.locks
    }

    /// Add usage to the counter dated `usage.date`.
    ///
    /// Creates the counter if the client has none and closes a stale one
    /// first. A counter dated after `usage.date` is a clock skew and nothing
    /// is written. The caller holds the client's lock and owns `conn`.
    pub async fn apply_usage<C: ConnectionTrait>(
        &self,
        conn: &C,
        usage: &CounterUsage<'_>,
        now: DateTime<Utc>,
    ) -> MeteringResult<ApplyOutcome> {
        let client = usage.client_org_id;
        let mut closed_day = None;

        match self.counters.find(conn, client).await? {
            None => {
                self.counters
                    .create(conn, client, usage.date, &usage.delta, now)
                    .await?;
            }
            Some(counter) if counter.counter_date > usage.date => {
                error!(
                    client_org_id = client,
                    counter_date = %counter.counter_date,
                    event_date = %usage.date,
                    "Live counter is dated after the incoming event"
                );
                return Err(MeteringError::ClockSkewDetected {
                    client_org_id: client.to_string(),
                    counter_date: counter.counter_date,
                    event_date: usage.date,
                });
            }
            Some(counter) => {
                if counter.counter_date < usage.date {
                    let closed =
                        close_day(conn, &self.counters, &self.daily, &counter, usage.date, now)
                            .await?;
                    if closed.is_none() {
                        return Err(concurrent_update(client));
                    }
                    closed_day = Some(counter.counter_date);
                }

                let updated = self
                    .counters
                    .increment(conn, client, usage.date, &usage.delta, now)
                    .await?;
                if updated == 0 {
                    return Err(concurrent_update(client));
                }
            }
        }

        self.counters
            .increment_user(conn, client, usage.date, usage.user_id, &usage.delta, now)
            .await?;
        self.counters
            .increment_model(
                conn,
                client,
                usage.date,
                usage.model,
                usage.provider,
                &usage.delta,
                now,
            )
            .await?;

        debug!(
            client_org_id = client,
            date = %usage.date,
            tokens = usage.delta.total_tokens(),
            "Applied usage to live counter"
        );
        Ok(ApplyOutcome { closed_day })
    }

    /// Read the counter without touching it
    pub async fn peek(&self, client_org_id: &str) -> MeteringResult<Option<CounterSnapshot>> {
        Ok(self
            .counters
            .peek(client_org_id)
            .await?
            .as_ref()
            .map(CounterSnapshot::from))
    }

    /// Zero the counter and move it to `new_date`. Only valid right after the
    /// old day has been persisted; `false` means the counter was no longer
    /// dated `expected_date`.
    pub async fn reset_for_new_day<C: ConnectionTrait>(
        &self,
        conn: &C,
        client_org_id: &str,
        expected_date: NaiveDate,
        new_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> MeteringResult<bool> {
        let rows = self
            .counters
            .reset(conn, client_org_id, expected_date, new_date, now)
            .await?;
        Ok(rows > 0)
    }

    pub async fn user_breakdown<C: ConnectionTrait>(
        &self,
        conn: &C,
        client_org_id: &str,
        date: NaiveDate,
    ) -> MeteringResult<Vec<UserLiveCounterRecord>> {
        Ok(self.counters.user_breakdown(conn, client_org_id, date).await?)
    }

    pub async fn model_breakdown<C: ConnectionTrait>(
        &self,
        conn: &C,
        client_org_id: &str,
        date: NaiveDate,
    ) -> MeteringResult<Vec<ModelLiveCounterRecord>> {
        Ok(self.counters.model_breakdown(conn, client_org_id, date).await?)
    }
}

fn concurrent_update(client_org_id: &str) -> MeteringError {
    MeteringError::Database(DatabaseError::Constraint(format!(
        "live counter for {client_org_id} changed concurrently"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_locks_are_per_client() {
        let locks = ClientLocks::new();
        let acme = locks.lock("acme").await;

        // another client is not blocked
        let globex = tokio::time::timeout(std::time::Duration::from_millis(50), locks.lock("globex"))
            .await;
        assert!(globex.is_ok());

        // the same client is
        let again =
            tokio::time::timeout(std::time::Duration::from_millis(50), locks.lock("acme")).await;
        assert!(again.is_err());

        drop(acme);
        let again =
            tokio::time::timeout(std::time::Duration::from_millis(50), locks.lock("acme")).await;
        assert!(again.is_ok());
        assert_eq!(locks.len(), 2);
    }
}

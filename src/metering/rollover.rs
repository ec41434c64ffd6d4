//! Closing a live counter's day into the daily aggregate tables.
//!
//! A close upserts the client, per-user and per-model rows for the
//! counter's date, drops that day's breakdown rows and resets the counter to
//! the new date, all on one connection. The reset is a compare-and-set on
//! the counter's observed date, so a second close of the same day affects
//! nothing and the caller rolls its transaction back.

use super::counters::ClientLocks;
use super::types::UsageTotals;
use crate::clock::Clock;
use crate::database::entities::LiveCounterRecord;
use crate::database::{ClientDay, CounterDelta, DailyUsageDao, LiveCountersDao};
use crate::error::MeteringResult;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{ConnectionTrait, DatabaseConnection, TransactionTrait};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClosedDay {
    pub date: NaiveDate,
    pub totals: UsageTotals,
    pub users: usize,
    pub models: usize,
    pub primary_model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RolloverResult {
    RolledOver { closed: ClosedDay, new_date: NaiveDate },
    NoOpAlreadyCurrent,
    NoCounter,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub rolled_over: usize,
    pub already_current: usize,
    pub failures: Vec<(String, String)>,
}

/// Persist `counter`'s day and reset it to `new_date` on `conn`.
///
/// Returns `None` when the counter was no longer dated as observed. The
/// caller must then discard everything written on `conn`.
pub(crate) async fn close_day<C: ConnectionTrait>(
    conn: &C,
    counters: &LiveCountersDao,
    daily: &DailyUsageDao,
    counter: &LiveCounterRecord,
    new_date: NaiveDate,
    now: DateTime<Utc>,
) -> MeteringResult<Option<ClosedDay>> {
    let client = counter.client_org_id.as_str();
    let date = counter.counter_date;

    let users = counters.user_breakdown(conn, client, date).await?;
    let models = counters.model_breakdown(conn, client, date).await?;

    // ties go to the alphabetically first model
    let mut primary: Option<(&str, i64)> = None;
    for model in &models {
        if primary.is_none_or(|(_, tokens)| model.total_tokens > tokens) {
            primary = Some((model.model_name.as_str(), model.total_tokens));
        }
    }
    let primary_model = primary.map(|(name, _)| name.to_string());

    let delta = CounterDelta::from(counter);
    if delta != CounterDelta::default() {
        let day = ClientDay {
            delta,
            primary_model: primary_model.clone(),
            unique_users: i32::try_from(users.len()).unwrap_or(i32::MAX),
        };
        daily.upsert_client_day(conn, client, date, &day, now).await?;
    }

    for user in &users {
        daily
            .upsert_user_day(conn, client, &user.user_id, date, &CounterDelta::from(user), now)
            .await?;
    }
    for model in &models {
        daily
            .upsert_model_day(
                conn,
                client,
                &model.model_name,
                &model.provider,
                date,
                &CounterDelta::from(model),
                now,
            )
            .await?;
    }

    counters.clear_breakdowns(conn, client, date).await?;

    let reset = counters.reset(conn, client, date, new_date, now).await?;
    if reset == 0 {
        return Ok(None);
    }

    Ok(Some(ClosedDay {
        date,
        totals: UsageTotals::from(counter),
        users: users.len(),
        models: models.len(),
        primary_model,
    }))
}

pub struct DailyRolloverEngine {
    db: DatabaseConnection,
    counters: LiveCountersDao,
    daily: DailyUsageDao,
    locks: Arc<ClientLocks>,
    clock: Arc<dyn Clock>,
}

impl DailyRolloverEngine {
    pub fn new(
        db: DatabaseConnection,
        counters: LiveCountersDao,
        daily: DailyUsageDao,
        locks: Arc<ClientLocks>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            counters,
            daily,
            locks,
            clock,
        }
    }

    /// Close the client's live counter if it is dated before today
    pub async fn rollover(&self, client_org_id: &str) -> MeteringResult<RolloverResult> {
        let _guard = self.locks.lock(client_org_id).await;
        let today = self.clock.today();
        let now = self.clock.now();

        let txn = self.db.begin().await?;

        let counter = match self.counters.find(&txn, client_org_id).await? {
            Some(counter) => counter,
            None => {
                txn.rollback().await?;
                return Ok(RolloverResult::NoCounter);
            }
        };

        if counter.counter_date >= today {
            if counter.counter_date > today {
                warn!(
                    client_org_id,
                    counter_date = %counter.counter_date,
                    %today,
                    "Live counter is dated in the future"
                );
            }
            txn.rollback().await?;
            return Ok(RolloverResult::NoOpAlreadyCurrent);
        }

        match close_day(&txn, &self.counters, &self.daily, &counter, today, now).await {
            Ok(Some(closed)) => {
                txn.commit().await?;
                crate::metrics::rollover_completed();
                info!(
                    client_org_id,
                    closed_date = %closed.date,
                    new_date = %today,
                    tokens = closed.totals.total_tokens,
                    markup_cost = %closed.totals.markup_cost,
                    "Rolled over live counter"
                );
                Ok(RolloverResult::RolledOver {
                    closed,
                    new_date: today,
                })
            }
            Ok(None) => {
                txn.rollback().await?;
                Ok(RolloverResult::NoOpAlreadyCurrent)
            }
            Err(e) => {
                crate::metrics::rollover_failed();
                error!(client_org_id, "Rollover failed: {}", e);
                txn.rollback().await?;
                Err(e)
            }
        }
    }

    /// Roll over every client whose counter is dated before today. One
    /// client's failure does not stop the others.
    pub async fn sweep(&self) -> MeteringResult<SweepReport> {
        let today = self.clock.today();
        let stale = self.counters.find_stale(today).await?;
        let mut report = SweepReport {
            examined: stale.len(),
            ..Default::default()
        };

        for counter in stale {
            match self.rollover(&counter.client_org_id).await {
                Ok(RolloverResult::RolledOver { .. }) => report.rolled_over += 1,
                Ok(RolloverResult::NoOpAlreadyCurrent) | Ok(RolloverResult::NoCounter) => {
                    report.already_current += 1
                }
                Err(e) => report.failures.push((counter.client_org_id, e.to_string())),
            }
        }

        info!(
            %today,
            examined = report.examined,
            rolled_over = report.rolled_over,
            failures = report.failures.len(),
            "Rollover sweep finished"
        );
        Ok(report)
    }
}

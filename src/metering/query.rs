//! Read side: historical aggregates plus the live counter.
//!
//! Every read first rolls over a stale counter so a previous day is never
//! read from the live table. If that rollover fails the query still answers
//! from history and reports the live contribution as pending.

use super::counters::{CounterSnapshot, LiveCounterStore};
use super::rollover::DailyRolloverEngine;
use super::types::{DateRange, UsageTotals};
use crate::clock::Clock;
use crate::database::entities::ClientOrganization;
use crate::database::{CachedClientOrganizationsDao, DailyUsageDao};
use crate::error::{MeteringError, MeteringResult};
use crate::metering::calculator::ClientContext;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::warn;

/// How the live counter contributed to a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "counter", rename_all = "snake_case")]
pub enum LiveContribution {
    /// Added to the historical totals
    Included(CounterSnapshot),
    /// Stale and could not be rolled over; not added
    Pending(Option<CounterSnapshot>),
    /// A historical row already exists for the counter's date; not added
    Superseded(CounterSnapshot),
    /// No counter, an empty one, or one outside the range
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeTotals {
    pub client_org_id: String,
    pub range: DateRange,
    pub totals: UsageTotals,
    pub live: LiveContribution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthToDate {
    pub client_org_id: String,
    pub month_start: NaiveDate,
    pub as_of: NaiveDate,
    pub totals: UsageTotals,
    pub live: LiveContribution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DaySource {
    Historical,
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayUsage {
    pub date: NaiveDate,
    pub totals: UsageTotals,
    pub primary_model: Option<String>,
    pub unique_users: i64,
    pub source: DaySource,
}

/// Per-day rows plus how the live counter was treated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyBreakdown {
    pub client_org_id: String,
    pub range: DateRange,
    pub days: Vec<DayUsage>,
    pub live: LiveContribution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserUsage {
    pub user_id: String,
    pub totals: UsageTotals,
    pub days_active: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelUsage {
    pub model_name: String,
    pub provider: String,
    pub totals: UsageTotals,
    pub days_active: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserBreakdown {
    pub client_org_id: String,
    pub range: DateRange,
    pub users: Vec<UserUsage>,
    pub live: LiveContribution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelBreakdown {
    pub client_org_id: String,
    pub range: DateRange,
    pub models: Vec<ModelUsage>,
    pub live: LiveContribution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetStatus {
    pub client_org_id: String,
    pub limit: Option<Decimal>,
    pub spent: Decimal,
    pub remaining: Option<Decimal>,
    pub within_limit: bool,
    /// Percentage of the limit spent, two decimal places
    pub usage_percent: Option<Decimal>,
    /// A stale counter from this month could not be closed; its spend is
    /// not in `spent`
    pub pending: bool,
    /// Billed cost on the unclosed counter, counted against the limit
    pub pending_spend: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientBillingSummary {
    pub client_org_id: String,
    pub name: String,
    pub markup_rate: Decimal,
    pub totals: UsageTotals,
    pub profit: Decimal,
    pub live: LiveContribution,
}

/// Live counter as seen by one query
struct LiveView {
    snapshot: Option<CounterSnapshot>,
    pending: bool,
}

impl LiveView {
    /// The snapshot if it belongs in `range` and carries usage
    fn in_range(&self, range: &DateRange) -> Option<&CounterSnapshot> {
        self.snapshot
            .as_ref()
            .filter(|snapshot| range.contains(snapshot.date) && !snapshot.totals.is_empty())
    }
}

pub struct UsageStatsQueryService {
    db: DatabaseConnection,
    clients: CachedClientOrganizationsDao,
    counters: LiveCounterStore,
    daily: DailyUsageDao,
    rollover: Arc<DailyRolloverEngine>,
    clock: Arc<dyn Clock>,
}

impl UsageStatsQueryService {
    pub fn new(
        db: DatabaseConnection,
        clients: CachedClientOrganizationsDao,
        counters: LiveCounterStore,
        daily: DailyUsageDao,
        rollover: Arc<DailyRolloverEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            clients,
            counters,
            daily,
            rollover,
            clock,
        }
    }

    pub async fn month_to_date(&self, client_org_id: &str) -> MeteringResult<MonthToDate> {
        let range = DateRange::month_to_date(self.clock.today());
        let result = self.totals_for_range(client_org_id, range).await?;
        Ok(MonthToDate {
            client_org_id: result.client_org_id,
            month_start: range.start,
            as_of: range.end,
            totals: result.totals,
            live: result.live,
        })
    }

    pub async fn totals_for_range(
        &self,
        client_org_id: &str,
        range: DateRange,
    ) -> MeteringResult<RangeTotals> {
        self.require_client(client_org_id).await?;
        let live = self.live_view(client_org_id).await?;
        let history = self
            .daily
            .client_days(client_org_id, range.start, range.end)
            .await?;

        let mut totals: UsageTotals = history.iter().map(UsageTotals::from).sum();
        let historical_dates: BTreeSet<NaiveDate> =
            history.iter().map(|row| row.usage_date).collect();

        let contribution = live_contribution(client_org_id, &live, &range, &historical_dates);
        if let LiveContribution::Included(snapshot) = &contribution {
            totals += snapshot.totals;
        }

        Ok(RangeTotals {
            client_org_id: client_org_id.to_string(),
            range,
            totals,
            live: contribution,
        })
    }

    /// One row per day with usage, oldest first
    pub async fn daily_breakdown(
        &self,
        client_org_id: &str,
        range: DateRange,
    ) -> MeteringResult<DailyBreakdown> {
        self.require_client(client_org_id).await?;
        let live = self.live_view(client_org_id).await?;
        let history = self
            .daily
            .client_days(client_org_id, range.start, range.end)
            .await?;

        let mut days: Vec<DayUsage> = history
            .iter()
            .map(|row| DayUsage {
                date: row.usage_date,
                totals: UsageTotals::from(row),
                primary_model: row.primary_model.clone(),
                unique_users: i64::from(row.unique_users),
                source: DaySource::Historical,
            })
            .collect();

        let historical_dates: BTreeSet<NaiveDate> = days.iter().map(|day| day.date).collect();
        let contribution = live_contribution(client_org_id, &live, &range, &historical_dates);
        if let LiveContribution::Included(snapshot) = &contribution {
            let models = self
                .counters
                .model_breakdown(&self.db, client_org_id, snapshot.date)
                .await?;
            let users = self
                .counters
                .user_breakdown(&self.db, client_org_id, snapshot.date)
                .await?;
            let mut primary: Option<(&str, i64)> = None;
            for model in &models {
                if primary.is_none_or(|(_, tokens)| model.total_tokens > tokens) {
                    primary = Some((model.model_name.as_str(), model.total_tokens));
                }
            }
            days.push(DayUsage {
                date: snapshot.date,
                totals: snapshot.totals,
                primary_model: primary.map(|(name, _)| name.to_string()),
                unique_users: users.len() as i64,
                source: DaySource::Live,
            });
        }

        days.sort_by_key(|day| day.date);
        Ok(DailyBreakdown {
            client_org_id: client_org_id.to_string(),
            range,
            days,
            live: contribution,
        })
    }

    /// Usage per user in range, highest billed first
    pub async fn by_user(
        &self,
        client_org_id: &str,
        range: DateRange,
    ) -> MeteringResult<UserBreakdown> {
        self.require_client(client_org_id).await?;
        let live = self.live_view(client_org_id).await?;
        let history = self
            .daily
            .user_days(client_org_id, range.start, range.end)
            .await?;

        let mut acc: BTreeMap<String, (UsageTotals, BTreeSet<NaiveDate>)> = BTreeMap::new();
        for row in &history {
            let entry = acc.entry(row.user_id.clone()).or_default();
            entry.0 += UsageTotals::from(row);
            entry.1.insert(row.usage_date);
        }

        let contribution = self.breakdown_contribution(client_org_id, &live, &range).await?;
        if let LiveContribution::Included(snapshot) = &contribution {
            let date = snapshot.date;
            for row in self
                .counters
                .user_breakdown(&self.db, client_org_id, date)
                .await?
            {
                let entry = acc.entry(row.user_id.clone()).or_default();
                entry.0 += UsageTotals::from(&row);
                entry.1.insert(date);
            }
        }

        let mut users: Vec<UserUsage> = acc
            .into_iter()
            .map(|(user_id, (totals, dates))| UserUsage {
                user_id,
                totals,
                days_active: dates.len(),
            })
            .collect();
        users.sort_by(|a, b| b.totals.markup_cost.cmp(&a.totals.markup_cost));
        Ok(UserBreakdown {
            client_org_id: client_org_id.to_string(),
            range,
            users,
            live: contribution,
        })
    }

    /// Usage per model in range, highest billed first
    pub async fn by_model(
        &self,
        client_org_id: &str,
        range: DateRange,
    ) -> MeteringResult<ModelBreakdown> {
        self.require_client(client_org_id).await?;
        let live = self.live_view(client_org_id).await?;
        let history = self
            .daily
            .model_days(client_org_id, range.start, range.end)
            .await?;

        let mut acc: BTreeMap<String, (String, UsageTotals, BTreeSet<NaiveDate>)> =
            BTreeMap::new();
        for row in &history {
            let entry = acc
                .entry(row.model_name.clone())
                .or_insert_with(|| (row.provider.clone(), UsageTotals::default(), BTreeSet::new()));
            entry.1 += UsageTotals::from(row);
            entry.2.insert(row.usage_date);
        }

        let contribution = self.breakdown_contribution(client_org_id, &live, &range).await?;
        if let LiveContribution::Included(snapshot) = &contribution {
            let date = snapshot.date;
            for row in self
                .counters
                .model_breakdown(&self.db, client_org_id, date)
                .await?
            {
                let entry = acc
                    .entry(row.model_name.clone())
                    .or_insert_with(|| (row.provider.clone(), UsageTotals::default(), BTreeSet::new()));
                entry.1 += UsageTotals::from(&row);
                entry.2.insert(date);
            }
        }

        let mut models: Vec<ModelUsage> = acc
            .into_iter()
            .map(|(model_name, (provider, totals, dates))| ModelUsage {
                model_name,
                provider,
                totals,
                days_active: dates.len(),
            })
            .collect();
        models.sort_by(|a, b| b.totals.markup_cost.cmp(&a.totals.markup_cost));
        Ok(ModelBreakdown {
            client_org_id: client_org_id.to_string(),
            range,
            models,
            live: contribution,
        })
    }

    /// Month-to-date billed cost against the client's monthly limit
    pub async fn budget_status(&self, client_org_id: &str) -> MeteringResult<BudgetStatus> {
        let client = self.require_client(client_org_id).await?;
        let context = ClientContext::try_from(&client)?;
        let month = self.month_to_date(client_org_id).await?;
        let spent = month.totals.markup_cost;
        // an unclosed day from a previous month does not count against this one
        let pending_snapshot = match &month.live {
            LiveContribution::Pending(Some(snapshot)) if snapshot.date >= month.month_start => {
                Some(snapshot)
            }
            _ => None,
        };
        let pending = pending_snapshot.is_some();
        let pending_spend =
            pending_snapshot.map_or(Decimal::ZERO, |snapshot| snapshot.totals.markup_cost);

        let status = match context.monthly_limit {
            Some(limit) => {
                let usage_percent = if limit.is_zero() {
                    None
                } else {
                    Some((spent / limit * Decimal::ONE_HUNDRED).round_dp(2))
                };
                BudgetStatus {
                    client_org_id: client_org_id.to_string(),
                    limit: Some(limit),
                    spent,
                    remaining: Some((limit - spent).max(Decimal::ZERO)),
                    within_limit: spent + pending_spend <= limit,
                    usage_percent,
                    pending,
                    pending_spend,
                }
            }
            None => BudgetStatus {
                client_org_id: client_org_id.to_string(),
                limit: None,
                spent,
                remaining: None,
                within_limit: true,
                usage_percent: None,
                pending,
                pending_spend,
            },
        };
        Ok(status)
    }

    /// Totals for every active client, highest billed first
    pub async fn billing_overview(
        &self,
        range: DateRange,
    ) -> MeteringResult<Vec<ClientBillingSummary>> {
        let clients = self.clients.list(true).await?;
        let mut summaries = Vec::with_capacity(clients.len());

        for client in clients {
            let context = match ClientContext::try_from(&client) {
                Ok(context) => context,
                Err(e) => {
                    warn!(client_org_id = %client.id, "Skipping client in overview: {}", e);
                    continue;
                }
            };
            let result = self.totals_for_range(&client.id, range).await?;
            summaries.push(ClientBillingSummary {
                client_org_id: client.id,
                name: client.name,
                markup_rate: context.markup_rate,
                profit: result.totals.profit(),
                totals: result.totals,
                live: result.live,
            });
        }

        summaries.sort_by(|a, b| b.totals.markup_cost.cmp(&a.totals.markup_cost));
        Ok(summaries)
    }

    async fn require_client(&self, client_org_id: &str) -> MeteringResult<ClientOrganization> {
        self.clients
            .find_by_id(client_org_id)
            .await?
            .ok_or_else(|| MeteringError::ClientNotFound(client_org_id.to_string()))
    }

    /// Peek the counter, rolling it over first when it is stale
    async fn live_view(&self, client_org_id: &str) -> MeteringResult<LiveView> {
        let today = self.clock.today();
        let snapshot = self.counters.peek(client_org_id).await?;

        let stale = snapshot.as_ref().is_some_and(|s| s.date < today);
        if !stale {
            return Ok(LiveView {
                snapshot,
                pending: false,
            });
        }

        match self.rollover.rollover(client_org_id).await {
            Ok(_) => Ok(LiveView {
                snapshot: self.counters.peek(client_org_id).await?,
                pending: false,
            }),
            Err(e) => {
                warn!(
                    client_org_id,
                    "Lazy rollover failed, answering from history only: {}", e
                );
                Ok(LiveView {
                    snapshot,
                    pending: true,
                })
            }
        }
    }

    /// Live contribution for a per-user or per-model read. Those tables
    /// have no row per day, so the client-level history decides the anomaly.
    async fn breakdown_contribution(
        &self,
        client_org_id: &str,
        live: &LiveView,
        range: &DateRange,
    ) -> MeteringResult<LiveContribution> {
        let mut historical_dates = BTreeSet::new();
        if let Some(snapshot) = live.in_range(range).filter(|_| !live.pending) {
            if self
                .daily
                .client_day(client_org_id, snapshot.date)
                .await?
                .is_some()
            {
                historical_dates.insert(snapshot.date);
            }
        }
        Ok(live_contribution(client_org_id, live, range, &historical_dates))
    }
}

fn live_contribution(
    client_org_id: &str,
    live: &LiveView,
    range: &DateRange,
    historical_dates: &BTreeSet<NaiveDate>,
) -> LiveContribution {
    if live.pending {
        return LiveContribution::Pending(live.snapshot.clone());
    }
    match live.in_range(range) {
        Some(snapshot) if historical_dates.contains(&snapshot.date) => {
            warn_anomaly(client_org_id, snapshot.date);
            LiveContribution::Superseded(snapshot.clone())
        }
        Some(snapshot) => LiveContribution::Included(snapshot.clone()),
        None => LiveContribution::Absent,
    }
}

fn warn_anomaly(client_org_id: &str, date: NaiveDate) {
    warn!(
        client_org_id,
        %date,
        "Historical row and live counter share a date, using the historical row"
    );
}

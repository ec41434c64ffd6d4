//! Closed-day aggregates.
//!
//! Rows are written only by the rollover path. Every write is a
//! create-or-add upsert on the natural key, so closing the same day twice
//! adds instead of inserting a second row.

use super::live_counters::CounterDelta;
use crate::database::DatabaseResult;
use crate::database::entities::{
    ClientDailyUsageRecord, ModelDailyUsageRecord, UserDailyUsageRecord, client_daily_usage,
    client_model_daily_usage, client_user_daily_usage,
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};

/// Client-level totals for one closed day
#[derive(Debug, Clone, Default)]
pub struct ClientDay {
    pub delta: CounterDelta,
    pub primary_model: Option<String>,
    pub unique_users: i32,
}

#[derive(Clone)]
pub struct DailyUsageDao {
    db: DatabaseConnection,
}

impl DailyUsageDao {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn upsert_client_day<C: ConnectionTrait>(
        &self,
        conn: &C,
        client_org_id: &str,
        date: NaiveDate,
        day: &ClientDay,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        use client_daily_usage::{Column, Entity};

        let delta = &day.delta;
        let model = client_daily_usage::ActiveModel {
            id: NotSet,
            client_org_id: Set(client_org_id.to_string()),
            usage_date: Set(date),
            total_tokens: Set(delta.total_tokens()),
            input_tokens: Set(delta.input_tokens),
            output_tokens: Set(delta.output_tokens),
            total_requests: Set(delta.requests),
            raw_cost_nanos: Set(delta.raw_cost_nanos),
            markup_cost_nanos: Set(delta.markup_cost_nanos),
            primary_model: Set(day.primary_model.clone()),
            unique_users: Set(day.unique_users),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // unique_users becomes an upper bound when a day is closed twice
        let on_conflict = OnConflict::columns([Column::ClientOrgId, Column::UsageDate])
            .value(
                Column::TotalTokens,
                Expr::col((Entity, Column::TotalTokens)).add(delta.total_tokens()),
            )
            .value(
                Column::InputTokens,
                Expr::col((Entity, Column::InputTokens)).add(delta.input_tokens),
            )
            .value(
                Column::OutputTokens,
                Expr::col((Entity, Column::OutputTokens)).add(delta.output_tokens),
            )
            .value(
                Column::TotalRequests,
                Expr::col((Entity, Column::TotalRequests)).add(delta.requests),
            )
            .value(
                Column::RawCostNanos,
                Expr::col((Entity, Column::RawCostNanos)).add(delta.raw_cost_nanos),
            )
            .value(
                Column::MarkupCostNanos,
                Expr::col((Entity, Column::MarkupCostNanos)).add(delta.markup_cost_nanos),
            )
            .value(
                Column::UniqueUsers,
                Expr::col((Entity, Column::UniqueUsers)).add(day.unique_users),
            )
            .update_columns([Column::PrimaryModel, Column::UpdatedAt])
            .to_owned();

        Entity::insert(model)
            .on_conflict(on_conflict)
            .exec_without_returning(conn)
            .await?;
        Ok(())
    }

    pub async fn upsert_user_day<C: ConnectionTrait>(
        &self,
        conn: &C,
        client_org_id: &str,
        user_id: &str,
        date: NaiveDate,
        delta: &CounterDelta,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        use client_user_daily_usage::{Column, Entity};

        let model = client_user_daily_usage::ActiveModel {
            id: NotSet,
            client_org_id: Set(client_org_id.to_string()),
            user_id: Set(user_id.to_string()),
            usage_date: Set(date),
            total_tokens: Set(delta.total_tokens()),
            input_tokens: Set(delta.input_tokens),
            output_tokens: Set(delta.output_tokens),
            total_requests: Set(delta.requests),
            raw_cost_nanos: Set(delta.raw_cost_nanos),
            markup_cost_nanos: Set(delta.markup_cost_nanos),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let on_conflict = OnConflict::columns([Column::ClientOrgId, Column::UserId, Column::UsageDate])
            .value(
                Column::TotalTokens,
                Expr::col((Entity, Column::TotalTokens)).add(delta.total_tokens()),
            )
            .value(
                Column::InputTokens,
                Expr::col((Entity, Column::InputTokens)).add(delta.input_tokens),
            )
            .value(
                Column::OutputTokens,
                Expr::col((Entity, Column::OutputTokens)).add(delta.output_tokens),
            )
            .value(
                Column::TotalRequests,
                Expr::col((Entity, Column::TotalRequests)).add(delta.requests),
            )
            .value(
                Column::RawCostNanos,
                Expr::col((Entity, Column::RawCostNanos)).add(delta.raw_cost_nanos),
            )
            .value(
                Column::MarkupCostNanos,
                Expr::col((Entity, Column::MarkupCostNanos)).add(delta.markup_cost_nanos),
            )
            .update_column(Column::UpdatedAt)
            .to_owned();

        Entity::insert(model)
            .on_conflict(on_conflict)
            .exec_without_returning(conn)
            .await?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_model_day<C: ConnectionTrait>(
        &self,
        conn: &C,
        client_org_id: &str,
        model_name: &str,
        provider: &str,
        date: NaiveDate,
        delta: &CounterDelta,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        use client_model_daily_usage::{Column, Entity};

        let model = client_model_daily_usage::ActiveModel {
            id: NotSet,
            client_org_id: Set(client_org_id.to_string()),
            model_name: Set(model_name.to_string()),
            provider: Set(provider.to_string()),
            usage_date: Set(date),
            total_tokens: Set(delta.total_tokens()),
            input_tokens: Set(delta.input_tokens),
            output_tokens: Set(delta.output_tokens),
            total_requests: Set(delta.requests),
            raw_cost_nanos: Set(delta.raw_cost_nanos),
            markup_cost_nanos: Set(delta.markup_cost_nanos),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let on_conflict =
            OnConflict::columns([Column::ClientOrgId, Column::ModelName, Column::UsageDate])
                .value(
                    Column::TotalTokens,
                    Expr::col((Entity, Column::TotalTokens)).add(delta.total_tokens()),
                )
                .value(
                    Column::InputTokens,
                    Expr::col((Entity, Column::InputTokens)).add(delta.input_tokens),
                )
                .value(
                    Column::OutputTokens,
                    Expr::col((Entity, Column::OutputTokens)).add(delta.output_tokens),
                )
                .value(
                    Column::TotalRequests,
                    Expr::col((Entity, Column::TotalRequests)).add(delta.requests),
                )
                .value(
                    Column::RawCostNanos,
                    Expr::col((Entity, Column::RawCostNanos)).add(delta.raw_cost_nanos),
                )
                .value(
                    Column::MarkupCostNanos,
                    Expr::col((Entity, Column::MarkupCostNanos)).add(delta.markup_cost_nanos),
                )
                .update_columns([Column::Provider, Column::UpdatedAt])
                .to_owned();

        Entity::insert(model)
            .on_conflict(on_conflict)
            .exec_without_returning(conn)
            .await?;
        Ok(())
    }

    pub async fn client_day(
        &self,
        client_org_id: &str,
        date: NaiveDate,
    ) -> DatabaseResult<Option<ClientDailyUsageRecord>> {
        Ok(client_daily_usage::Entity::find()
            .filter(client_daily_usage::Column::ClientOrgId.eq(client_org_id))
            .filter(client_daily_usage::Column::UsageDate.eq(date))
            .one(&self.db)
            .await?)
    }

    /// Client rows with `start <= usage_date <= end`, oldest first
    pub async fn client_days(
        &self,
        client_org_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DatabaseResult<Vec<ClientDailyUsageRecord>> {
        Ok(client_daily_usage::Entity::find()
            .filter(client_daily_usage::Column::ClientOrgId.eq(client_org_id))
            .filter(client_daily_usage::Column::UsageDate.gte(start))
            .filter(client_daily_usage::Column::UsageDate.lte(end))
            .order_by_asc(client_daily_usage::Column::UsageDate)
            .all(&self.db)
            .await?)
    }

    pub async fn user_days(
        &self,
        client_org_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DatabaseResult<Vec<UserDailyUsageRecord>> {
        Ok(client_user_daily_usage::Entity::find()
            .filter(client_user_daily_usage::Column::ClientOrgId.eq(client_org_id))
            .filter(client_user_daily_usage::Column::UsageDate.gte(start))
            .filter(client_user_daily_usage::Column::UsageDate.lte(end))
            .order_by_asc(client_user_daily_usage::Column::UsageDate)
            .all(&self.db)
            .await?)
    }

    pub async fn model_days(
        &self,
        client_org_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> DatabaseResult<Vec<ModelDailyUsageRecord>> {
        Ok(client_model_daily_usage::Entity::find()
            .filter(client_model_daily_usage::Column::ClientOrgId.eq(client_org_id))
            .filter(client_model_daily_usage::Column::UsageDate.gte(start))
            .filter(client_model_daily_usage::Column::UsageDate.lte(end))
            .order_by_asc(client_model_daily_usage::Column::UsageDate)
            .all(&self.db)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use crate::database::{DatabaseConfig, DatabaseManager, DatabaseManagerImpl};
    use std::sync::Arc;

    async fn db() -> DatabaseManagerImpl {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..Default::default()
        };
        let db = DatabaseManagerImpl::new_from_config(&config, Arc::new(CacheManager::new_memory()))
            .await
            .unwrap();
        db.migrate().await.unwrap();
        db
    }

    fn delta(tokens: i64, raw: i64) -> CounterDelta {
        CounterDelta {
            input_tokens: tokens,
            output_tokens: 0,
            requests: 1,
            raw_cost_nanos: raw,
            markup_cost_nanos: raw * 2,
        }
    }

    #[tokio::test]
    async fn test_client_day_upsert_adds() {
        let db = db().await;
        let dao = db.daily_usage();
        let date = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let now = Utc::now();

        let first = ClientDay {
            delta: delta(100, 1_000),
            primary_model: Some("openai/gpt-4o".to_string()),
            unique_users: 1,
        };
        dao.upsert_client_day(db.connection(), "acme", date, &first, now)
            .await
            .unwrap();
        dao.upsert_client_day(db.connection(), "acme", date, &first, now)
            .await
            .unwrap();

        let rows = dao.client_days("acme", date, date).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_tokens, 200);
        assert_eq!(rows[0].total_requests, 2);
        assert_eq!(rows[0].raw_cost_nanos, 2_000);
        assert_eq!(rows[0].markup_cost_nanos, 4_000);
    }

    #[tokio::test]
    async fn test_dimension_upserts_keep_one_row_per_key() {
        let db = db().await;
        let dao = db.daily_usage();
        let date = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let now = Utc::now();

        for _ in 0..3 {
            dao.upsert_user_day(db.connection(), "acme", "alice", date, &delta(10, 5), now)
                .await
                .unwrap();
            dao.upsert_model_day(
                db.connection(),
                "acme",
                "anthropic/claude-3.5-sonnet",
                "anthropic",
                date,
                &delta(10, 5),
                now,
            )
            .await
            .unwrap();
        }

        let users = dao.user_days("acme", date, date).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].total_tokens, 30);

        let models = dao.model_days("acme", date, date).await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].total_requests, 3);
        assert_eq!(models[0].provider, "anthropic");

        // outside the range
        let next = date.succ_opt().unwrap();
        assert!(dao.user_days("acme", next, next).await.unwrap().is_empty());
    }
}

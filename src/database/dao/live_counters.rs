//! Live counter storage.
//!
//! Increments are expressed as `col = col + delta` in SQL so concurrent
//! writers never lose updates, whether or not they share a process.

use crate::database::DatabaseResult;
use crate::database::entities::{
    LiveCounterRecord, ModelLiveCounterRecord, UserLiveCounterRecord, client_live_counters,
    client_model_live_counters, client_user_live_counters,
};
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue::{NotSet, Set},
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};

/// Storage-level usage increment; costs are nano-USD
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterDelta {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub requests: i64,
    pub raw_cost_nanos: i64,
    pub markup_cost_nanos: i64,
}

impl CounterDelta {
    pub fn total_tokens(&self) -> i64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

#[derive(Clone)]
pub struct LiveCountersDao {
    db: DatabaseConnection,
}

impl LiveCountersDao {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find<C: ConnectionTrait>(
        &self,
        conn: &C,
        client_org_id: &str,
    ) -> DatabaseResult<Option<LiveCounterRecord>> {
        Ok(client_live_counters::Entity::find_by_id(client_org_id.to_string())
            .one(conn)
            .await?)
    }

    pub async fn peek(&self, client_org_id: &str) -> DatabaseResult<Option<LiveCounterRecord>> {
        self.find(&self.db, client_org_id).await
    }

    /// Counters whose date is strictly before `today`
    pub async fn find_stale(&self, today: NaiveDate) -> DatabaseResult<Vec<LiveCounterRecord>> {
        Ok(client_live_counters::Entity::find()
            .filter(client_live_counters::Column::CounterDate.lt(today))
            .order_by_asc(client_live_counters::Column::ClientOrgId)
            .all(&self.db)
            .await?)
    }

    pub async fn create<C: ConnectionTrait>(
        &self,
        conn: &C,
        client_org_id: &str,
        date: NaiveDate,
        delta: &CounterDelta,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        let model = client_live_counters::ActiveModel {
            client_org_id: Set(client_org_id.to_string()),
            counter_date: Set(date),
            total_tokens: Set(delta.total_tokens()),
            input_tokens: Set(delta.input_tokens),
            output_tokens: Set(delta.output_tokens),
            total_requests: Set(delta.requests),
            raw_cost_nanos: Set(delta.raw_cost_nanos),
            markup_cost_nanos: Set(delta.markup_cost_nanos),
            updated_at: Set(now),
        };
        client_live_counters::Entity::insert(model)
            .exec_without_returning(conn)
            .await?;
        Ok(())
    }

    /// Add to the counter only if it is still dated `date`. Returns rows affected.
    pub async fn increment<C: ConnectionTrait>(
        &self,
        conn: &C,
        client_org_id: &str,
        date: NaiveDate,
        delta: &CounterDelta,
        now: DateTime<Utc>,
    ) -> DatabaseResult<u64> {
        use client_live_counters::Column;

        let result = client_live_counters::Entity::update_many()
            .col_expr(
                Column::TotalTokens,
                Expr::col(Column::TotalTokens).add(delta.total_tokens()),
            )
            .col_expr(
                Column::InputTokens,
                Expr::col(Column::InputTokens).add(delta.input_tokens),
            )
            .col_expr(
                Column::OutputTokens,
                Expr::col(Column::OutputTokens).add(delta.output_tokens),
            )
            .col_expr(
                Column::TotalRequests,
                Expr::col(Column::TotalRequests).add(delta.requests),
            )
            .col_expr(
                Column::RawCostNanos,
                Expr::col(Column::RawCostNanos).add(delta.raw_cost_nanos),
            )
            .col_expr(
                Column::MarkupCostNanos,
                Expr::col(Column::MarkupCostNanos).add(delta.markup_cost_nanos),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::ClientOrgId.eq(client_org_id))
            .filter(Column::CounterDate.eq(date))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Zero the counter and move it to `new_date`, but only if it is still
    /// dated `expected_date`. Zero rows affected means someone else already did.
    pub async fn reset<C: ConnectionTrait>(
        &self,
        conn: &C,
        client_org_id: &str,
        expected_date: NaiveDate,
        new_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> DatabaseResult<u64> {
        use client_live_counters::Column;

        let result = client_live_counters::Entity::update_many()
            .col_expr(Column::CounterDate, Expr::value(new_date))
            .col_expr(Column::TotalTokens, Expr::value(0i64))
            .col_expr(Column::InputTokens, Expr::value(0i64))
            .col_expr(Column::OutputTokens, Expr::value(0i64))
            .col_expr(Column::TotalRequests, Expr::value(0i64))
            .col_expr(Column::RawCostNanos, Expr::value(0i64))
            .col_expr(Column::MarkupCostNanos, Expr::value(0i64))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::ClientOrgId.eq(client_org_id))
            .filter(Column::CounterDate.eq(expected_date))
            .exec(conn)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn increment_user<C: ConnectionTrait>(
        &self,
        conn: &C,
        client_org_id: &str,
        date: NaiveDate,
        user_id: &str,
        delta: &CounterDelta,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        use client_user_live_counters::{Column, Entity};

        let model = client_user_live_counters::ActiveModel {
            id: NotSet,
            client_org_id: Set(client_org_id.to_string()),
            counter_date: Set(date),
            user_id: Set(user_id.to_string()),
            total_tokens: Set(delta.total_tokens()),
            input_tokens: Set(delta.input_tokens),
            output_tokens: Set(delta.output_tokens),
            total_requests: Set(delta.requests),
            raw_cost_nanos: Set(delta.raw_cost_nanos),
            markup_cost_nanos: Set(delta.markup_cost_nanos),
            updated_at: Set(now),
        };

        let on_conflict = OnConflict::columns([Column::ClientOrgId, Column::CounterDate, Column::UserId])
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
    pub async fn increment_model<C: ConnectionTrait>(
        &self,
        conn: &C,
        client_org_id: &str,
        date: NaiveDate,
        model_name: &str,
        provider: &str,
        delta: &CounterDelta,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        use client_model_live_counters::{Column, Entity};

        let model = client_model_live_counters::ActiveModel {
            id: NotSet,
            client_org_id: Set(client_org_id.to_string()),
            counter_date: Set(date),
            model_name: Set(model_name.to_string()),
            provider: Set(provider.to_string()),
            total_tokens: Set(delta.total_tokens()),
            input_tokens: Set(delta.input_tokens),
            output_tokens: Set(delta.output_tokens),
            total_requests: Set(delta.requests),
            raw_cost_nanos: Set(delta.raw_cost_nanos),
            markup_cost_nanos: Set(delta.markup_cost_nanos),
            updated_at: Set(now),
        };

        let on_conflict =
            OnConflict::columns([Column::ClientOrgId, Column::CounterDate, Column::ModelName])
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

    pub async fn user_breakdown<C: ConnectionTrait>(
        &self,
        conn: &C,
        client_org_id: &str,
        date: NaiveDate,
    ) -> DatabaseResult<Vec<UserLiveCounterRecord>> {
        Ok(client_user_live_counters::Entity::find()
            .filter(client_user_live_counters::Column::ClientOrgId.eq(client_org_id))
            .filter(client_user_live_counters::Column::CounterDate.eq(date))
            .order_by_asc(client_user_live_counters::Column::UserId)
            .all(conn)
            .await?)
    }

    pub async fn model_breakdown<C: ConnectionTrait>(
        &self,
        conn: &C,
        client_org_id: &str,
        date: NaiveDate,
    ) -> DatabaseResult<Vec<ModelLiveCounterRecord>> {
        Ok(client_model_live_counters::Entity::find()
            .filter(client_model_live_counters::Column::ClientOrgId.eq(client_org_id))
            .filter(client_model_live_counters::Column::CounterDate.eq(date))
            .order_by_asc(client_model_live_counters::Column::ModelName)
            .all(conn)
            .await?)
    }

    /// Drop the per-user and per-model rows of a closed day
    pub async fn clear_breakdowns<C: ConnectionTrait>(
        &self,
        conn: &C,
        client_org_id: &str,
        date: NaiveDate,
    ) -> DatabaseResult<u64> {
        let users = client_user_live_counters::Entity::delete_many()
            .filter(client_user_live_counters::Column::ClientOrgId.eq(client_org_id))
            .filter(client_user_live_counters::Column::CounterDate.eq(date))
            .exec(conn)
            .await?;
        let models = client_model_live_counters::Entity::delete_many()
            .filter(client_model_live_counters::Column::ClientOrgId.eq(client_org_id))
            .filter(client_model_live_counters::Column::CounterDate.eq(date))
            .exec(conn)
            .await?;
        Ok(users.rows_affected + models.rows_affected)
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "client_daily_usage")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub client_org_id: String,
    pub usage_date: NaiveDate,
    pub total_tokens: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_requests: i64,
    pub raw_cost_nanos: i64,
    pub markup_cost_nanos: i64,
    /// Model with the most tokens that day
    pub primary_model: Option<String>,
    pub unique_users: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

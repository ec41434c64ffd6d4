use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-model share of a client's live counter, unique on (client, date, model)
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "client_model_live_counters")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub client_org_id: String,
    pub counter_date: NaiveDate,
    pub model_name: String,
    pub provider: String,
    pub total_tokens: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_requests: i64,
    pub raw_cost_nanos: i64,
    pub markup_cost_nanos: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

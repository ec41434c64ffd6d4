use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Dedup ledger. The primary key is the provider's generation id.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "processed_generations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub generation_id: String,
    pub client_org_id: String,
    pub processed_date: NaiveDate,
    pub processed_at: DateTime<Utc>,
    /// Billed (marked-up) cost in nano-USD
    pub total_cost_nanos: i64,
    pub total_tokens: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

use crate::cache::typed_cache;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A billable tenant. Never hard-deleted; see `is_active`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "client_organizations")]
#[typed_cache(ttl = 300, prefix = "client_org")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    /// SHA-256 of the provider credential
    pub api_key_hash: String,
    /// Exact decimal text, e.g. "1.3"
    pub markup_rate: String,
    pub monthly_limit_nanos: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Model {
    pub fn verify_api_key(&self, api_key: &str) -> bool {
        self.api_key_hash == hash_api_key(api_key)
    }
}

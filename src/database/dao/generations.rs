use crate::database::entities::{ProcessedGeneration, processed_generations};
use crate::database::{DatabaseError, DatabaseResult};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, SqlErr,
};

#[derive(Clone)]
pub struct ProcessedGenerationsDao {
    db: DatabaseConnection,
}

impl ProcessedGenerationsDao {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert a ledger row. Returns `false` when the generation id is already
    /// recorded; the primary key makes this atomic across workers.
    pub async fn insert<C: ConnectionTrait>(
        &self,
        conn: &C,
        record: &ProcessedGeneration,
    ) -> DatabaseResult<bool> {
        let model = processed_generations::ActiveModel {
            generation_id: Set(record.generation_id.clone()),
            client_org_id: Set(record.client_org_id.clone()),
            processed_date: Set(record.processed_date),
            processed_at: Set(record.processed_at),
            total_cost_nanos: Set(record.total_cost_nanos),
            total_tokens: Set(record.total_tokens),
        };

        match processed_generations::Entity::insert(model)
            .exec_without_returning(conn)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Ok(false)
            }
            Err(e) => Err(DatabaseError::from(e)),
        }
    }

    pub async fn find(&self, generation_id: &str) -> DatabaseResult<Option<ProcessedGeneration>> {
        Ok(processed_generations::Entity::find_by_id(generation_id.to_string())
            .one(&self.db)
            .await?)
    }

    pub async fn count_processed_before(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64> {
        Ok(processed_generations::Entity::find()
            .filter(processed_generations::Column::ProcessedAt.lt(cutoff))
            .count(&self.db)
            .await?)
    }

    pub async fn delete_processed_before(&self, cutoff: DateTime<Utc>) -> DatabaseResult<u64> {
        let result = processed_generations::Entity::delete_many()
            .filter(processed_generations::Column::ProcessedAt.lt(cutoff))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}

//! Database access layer with domain-specific DAOs
//!
//! Write paths that must commit together take any `ConnectionTrait`, so the
//! caller can pass a `DatabaseTransaction`. Read paths use the pooled
//! connection held by the DAO.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::CacheManager;
use async_trait::async_trait;
use sea_orm::{ConnectOptions, DatabaseConnection, DbErr, SqlErr};
use thiserror::Error;

pub mod config;
pub mod dao;
pub mod entities;
pub mod migration;

pub use config::DatabaseConfig;
pub use dao::{
    CachedClientOrganizationsDao, ClientDay, ClientOrganizationsDao, CounterDelta, DailyUsageDao,
    LiveCountersDao, NewClientOrganization, ProcessedGenerationsDao,
};

/// Database error types
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Record not found")]
    NotFound,
    #[error("Constraint violation: {0}")]
    Constraint(String),
    #[error("Migration error: {0}")]
    Migration(String),
}

impl From<DbErr> for DatabaseError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(msg)) => DatabaseError::Constraint(msg),
            Some(SqlErr::ForeignKeyConstraintViolation(msg)) => DatabaseError::Constraint(msg),
            _ => match err {
                DbErr::RecordNotFound(_) => DatabaseError::NotFound,
                other => DatabaseError::Database(other.to_string()),
            },
        }
    }
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Database manager trait for dependency injection and testing
#[async_trait]
pub trait DatabaseManager: Send + Sync {
    async fn migrate(&self) -> DatabaseResult<()>;

    async fn health_check(&self) -> DatabaseResult<()>;

    fn cache_manager(&self) -> Arc<CacheManager>;

    /// Client organizations, cached
    fn clients(&self) -> CachedClientOrganizationsDao;

    /// Dedup ledger
    fn generations(&self) -> ProcessedGenerationsDao;

    /// Live counters and their per-user / per-model breakdowns
    fn live_counters(&self) -> LiveCountersDao;

    /// Closed-day aggregates
    fn daily_usage(&self) -> DailyUsageDao;

    /// Direct connection, for transactions and migrations
    fn connection(&self) -> &DatabaseConnection;
}

pub struct DatabaseManagerImpl {
    pub connection: DatabaseConnection,
    cache_manager: Arc<CacheManager>,
}

impl DatabaseManagerImpl {
    pub async fn new_from_config(
        config: &DatabaseConfig,
        cache_manager: Arc<CacheManager>,
    ) -> DatabaseResult<Self> {
        let mut options = ConnectOptions::new(config.url.clone());

        // Every pooled connection to `sqlite::memory:` would be a separate database
        let max_connections = if is_in_memory(&config.url) {
            1
        } else {
            config.max_connections
        };
        options
            .max_connections(max_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .sqlx_logging(false);

        let connection = sea_orm::Database::connect(options).await?;

        Ok(Self {
            connection,
            cache_manager,
        })
    }
}

fn is_in_memory(url: &str) -> bool {
    url.starts_with("sqlite::memory:") || url.contains("mode=memory")
}

#[async_trait]
impl DatabaseManager for DatabaseManagerImpl {
    async fn migrate(&self) -> DatabaseResult<()> {
        use crate::database::migration::Migrator;
        use sea_orm_migration::MigratorTrait;

        tracing::info!("Running database migrations");

        Migrator::up(&self.connection, None)
            .await
            .map_err(|e| DatabaseError::Migration(format!("Failed to run migrations: {}", e)))?;

        tracing::info!("Successfully completed all migrations");
        Ok(())
    }

    async fn health_check(&self) -> DatabaseResult<()> {
        self.connection.ping().await.map_err(DatabaseError::from)
    }

    fn cache_manager(&self) -> Arc<CacheManager> {
        self.cache_manager.clone()
    }

    fn clients(&self) -> CachedClientOrganizationsDao {
        CachedClientOrganizationsDao::new(
            ClientOrganizationsDao::new(self.connection.clone()),
            &self.cache_manager,
        )
    }

    fn generations(&self) -> ProcessedGenerationsDao {
        ProcessedGenerationsDao::new(self.connection.clone())
    }

    fn live_counters(&self) -> LiveCountersDao {
        LiveCountersDao::new(self.connection.clone())
    }

    fn daily_usage(&self) -> DailyUsageDao {
        DailyUsageDao::new(self.connection.clone())
    }

    fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_detection() {
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite://file:metering?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite://./data/usage_metering.db?mode=rwc"));
        assert!(!is_in_memory("postgres://localhost/metering"));
    }

    #[tokio::test]
    async fn test_migrate_in_memory() {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..Default::default()
        };
        let db = DatabaseManagerImpl::new_from_config(&config, Arc::new(CacheManager::new_memory()))
            .await
            .unwrap();
        db.migrate().await.unwrap();
        db.health_check().await.unwrap();

        // migrations are re-runnable
        db.migrate().await.unwrap();
    }
}

use sea_orm_migration::prelude::*;

pub use sea_orm_migration::MigratorTrait;

mod m20240301_000001_create_client_organizations_table;
mod m20240301_000002_create_processed_generations_table;
mod m20240301_000003_create_live_counter_tables;
mod m20240301_000004_create_daily_usage_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_client_organizations_table::Migration),
            Box::new(m20240301_000002_create_processed_generations_table::Migration),
            Box::new(m20240301_000003_create_live_counter_tables::Migration),
            Box::new(m20240301_000004_create_daily_usage_tables::Migration),
        ]
    }
}

#[derive(Iden)]
pub enum ClientOrganizations {
    Table,
    Id,
    Name,
    ApiKeyHash,
    MarkupRate,
    MonthlyLimitNanos,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
pub enum ProcessedGenerations {
    Table,
    GenerationId,
    ClientOrgId,
    ProcessedDate,
    ProcessedAt,
    TotalCostNanos,
    TotalTokens,
}

#[derive(Iden)]
pub enum ClientLiveCounters {
    Table,
    ClientOrgId,
    CounterDate,
    UpdatedAt,
}

#[derive(Iden)]
pub enum ClientUserLiveCounters {
    Table,
    Id,
    ClientOrgId,
    CounterDate,
    UserId,
    UpdatedAt,
}

#[derive(Iden)]
pub enum ClientModelLiveCounters {
    Table,
    Id,
    ClientOrgId,
    CounterDate,
    ModelName,
    Provider,
    UpdatedAt,
}

#[derive(Iden)]
pub enum ClientDailyUsage {
    Table,
    Id,
    ClientOrgId,
    UsageDate,
    PrimaryModel,
    UniqueUsers,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
pub enum ClientUserDailyUsage {
    Table,
    Id,
    ClientOrgId,
    UserId,
    UsageDate,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
pub enum ClientModelDailyUsage {
    Table,
    Id,
    ClientOrgId,
    ModelName,
    Provider,
    UsageDate,
    CreatedAt,
    UpdatedAt,
}

/// The additive columns shared by every counter and aggregate table
#[derive(Iden, Clone, Copy)]
pub enum UsageColumns {
    TotalTokens,
    InputTokens,
    OutputTokens,
    TotalRequests,
    RawCostNanos,
    MarkupCostNanos,
}

impl UsageColumns {
    pub fn all() -> [UsageColumns; 6] {
        [
            UsageColumns::TotalTokens,
            UsageColumns::InputTokens,
            UsageColumns::OutputTokens,
            UsageColumns::TotalRequests,
            UsageColumns::RawCostNanos,
            UsageColumns::MarkupCostNanos,
        ]
    }

    /// Append the additive columns, all `BIGINT NOT NULL DEFAULT 0`
    pub fn add_to(table: &mut TableCreateStatement) -> &mut TableCreateStatement {
        for column in Self::all() {
            table.col(
                ColumnDef::new(column)
                    .big_integer()
                    .not_null()
                    .default(0),
            );
        }
        table
    }
}

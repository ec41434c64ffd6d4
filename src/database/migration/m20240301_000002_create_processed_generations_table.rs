use super::ProcessedGenerations;
use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // The primary key is the uniqueness guarantee the dedup ledger relies on
        manager
            .create_table(
                Table::create()
                    .table(ProcessedGenerations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ProcessedGenerations::GenerationId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ProcessedGenerations::ClientOrgId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProcessedGenerations::ProcessedDate)
                            .date()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProcessedGenerations::ProcessedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProcessedGenerations::TotalCostNanos)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ProcessedGenerations::TotalTokens)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_processed_generations_processed_at")
                    .table(ProcessedGenerations::Table)
                    .col(ProcessedGenerations::ProcessedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_processed_generations_client_date")
                    .table(ProcessedGenerations::Table)
                    .col(ProcessedGenerations::ClientOrgId)
                    .col(ProcessedGenerations::ProcessedDate)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ProcessedGenerations::Table).to_owned())
            .await
    }
}

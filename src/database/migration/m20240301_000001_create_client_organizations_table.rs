use super::ClientOrganizations;
use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ClientOrganizations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ClientOrganizations::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ClientOrganizations::Name).string().not_null())
                    .col(
                        ColumnDef::new(ClientOrganizations::ApiKeyHash)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ClientOrganizations::MarkupRate)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ClientOrganizations::MonthlyLimitNanos)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ClientOrganizations::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ClientOrganizations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ClientOrganizations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ClientOrganizations::Table).to_owned())
            .await
    }
}

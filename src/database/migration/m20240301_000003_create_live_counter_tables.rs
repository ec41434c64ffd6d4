use super::{ClientLiveCounters, ClientModelLiveCounters, ClientUserLiveCounters, UsageColumns};
use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let mut counters = Table::create();
        counters
            .table(ClientLiveCounters::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(ClientLiveCounters::ClientOrgId)
                    .string()
                    .not_null()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(ClientLiveCounters::CounterDate)
                    .date()
                    .not_null(),
            );
        UsageColumns::add_to(&mut counters).col(
            ColumnDef::new(ClientLiveCounters::UpdatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        );
        manager.create_table(counters.to_owned()).await?;

        let mut users = Table::create();
        users
            .table(ClientUserLiveCounters::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(ClientUserLiveCounters::Id)
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(ClientUserLiveCounters::ClientOrgId)
                    .string()
                    .not_null(),
            )
            .col(
                ColumnDef::new(ClientUserLiveCounters::CounterDate)
                    .date()
                    .not_null(),
            )
            .col(
                ColumnDef::new(ClientUserLiveCounters::UserId)
                    .string()
                    .not_null(),
            );
        UsageColumns::add_to(&mut users).col(
            ColumnDef::new(ClientUserLiveCounters::UpdatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        );
        manager.create_table(users.to_owned()).await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_client_user_live_counters_unique")
                    .table(ClientUserLiveCounters::Table)
                    .col(ClientUserLiveCounters::ClientOrgId)
                    .col(ClientUserLiveCounters::CounterDate)
                    .col(ClientUserLiveCounters::UserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        let mut models = Table::create();
        models
            .table(ClientModelLiveCounters::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(ClientModelLiveCounters::Id)
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(ClientModelLiveCounters::ClientOrgId)
                    .string()
                    .not_null(),
            )
            .col(
                ColumnDef::new(ClientModelLiveCounters::CounterDate)
                    .date()
                    .not_null(),
            )
            .col(
                ColumnDef::new(ClientModelLiveCounters::ModelName)
                    .string()
                    .not_null(),
            )
            .col(
                ColumnDef::new(ClientModelLiveCounters::Provider)
                    .string()
                    .not_null(),
            );
        UsageColumns::add_to(&mut models).col(
            ColumnDef::new(ClientModelLiveCounters::UpdatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        );
        manager.create_table(models.to_owned()).await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_client_model_live_counters_unique")
                    .table(ClientModelLiveCounters::Table)
                    .col(ClientModelLiveCounters::ClientOrgId)
                    .col(ClientModelLiveCounters::CounterDate)
                    .col(ClientModelLiveCounters::ModelName)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ClientModelLiveCounters::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ClientUserLiveCounters::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ClientLiveCounters::Table).to_owned())
            .await
    }
}

use super::{ClientDailyUsage, ClientModelDailyUsage, ClientUserDailyUsage, UsageColumns};
use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let mut daily = Table::create();
        daily
            .table(ClientDailyUsage::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(ClientDailyUsage::Id)
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(ClientDailyUsage::ClientOrgId)
                    .string()
                    .not_null(),
            )
            .col(ColumnDef::new(ClientDailyUsage::UsageDate).date().not_null());
        UsageColumns::add_to(&mut daily)
            .col(ColumnDef::new(ClientDailyUsage::PrimaryModel).string().null())
            .col(
                ColumnDef::new(ClientDailyUsage::UniqueUsers)
                    .integer()
                    .not_null()
                    .default(0),
            )
            .col(
                ColumnDef::new(ClientDailyUsage::CreatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .col(
                ColumnDef::new(ClientDailyUsage::UpdatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            );
        manager.create_table(daily.to_owned()).await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_client_daily_usage_unique")
                    .table(ClientDailyUsage::Table)
                    .col(ClientDailyUsage::ClientOrgId)
                    .col(ClientDailyUsage::UsageDate)
                    .unique()
                    .to_owned(),
            )
            .await?;

        let mut users = Table::create();
        users
            .table(ClientUserDailyUsage::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(ClientUserDailyUsage::Id)
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(ClientUserDailyUsage::ClientOrgId)
                    .string()
                    .not_null(),
            )
            .col(
                ColumnDef::new(ClientUserDailyUsage::UserId)
                    .string()
                    .not_null(),
            )
            .col(
                ColumnDef::new(ClientUserDailyUsage::UsageDate)
                    .date()
                    .not_null(),
            );
        UsageColumns::add_to(&mut users)
            .col(
                ColumnDef::new(ClientUserDailyUsage::CreatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .col(
                ColumnDef::new(ClientUserDailyUsage::UpdatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            );
        manager.create_table(users.to_owned()).await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_client_user_daily_usage_unique")
                    .table(ClientUserDailyUsage::Table)
                    .col(ClientUserDailyUsage::ClientOrgId)
                    .col(ClientUserDailyUsage::UserId)
                    .col(ClientUserDailyUsage::UsageDate)
                    .unique()
                    .to_owned(),
            )
            .await?;

        let mut models = Table::create();
        models
            .table(ClientModelDailyUsage::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(ClientModelDailyUsage::Id)
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(ClientModelDailyUsage::ClientOrgId)
                    .string()
                    .not_null(),
            )
            .col(
                ColumnDef::new(ClientModelDailyUsage::ModelName)
                    .string()
                    .not_null(),
            )
            .col(
                ColumnDef::new(ClientModelDailyUsage::Provider)
                    .string()
                    .not_null(),
            )
            .col(
                ColumnDef::new(ClientModelDailyUsage::UsageDate)
                    .date()
                    .not_null(),
            );
        UsageColumns::add_to(&mut models)
            .col(
                ColumnDef::new(ClientModelDailyUsage::CreatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .col(
                ColumnDef::new(ClientModelDailyUsage::UpdatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            );
        manager.create_table(models.to_owned()).await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_client_model_daily_usage_unique")
                    .table(ClientModelDailyUsage::Table)
                    .col(ClientModelDailyUsage::ClientOrgId)
                    .col(ClientModelDailyUsage::ModelName)
                    .col(ClientModelDailyUsage::UsageDate)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ClientModelDailyUsage::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ClientUserDailyUsage::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ClientDailyUsage::Table).to_owned())
            .await
    }
}

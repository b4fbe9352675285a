//! Create push subscription table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PushSubscription::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PushSubscription::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PushSubscription::UserId).integer().not_null())
                    .col(ColumnDef::new(PushSubscription::Endpoint).text().not_null())
                    .col(
                        ColumnDef::new(PushSubscription::P256dh)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PushSubscription::Auth)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PushSubscription::UserAgent).string_len(512))
                    .col(ColumnDef::new(PushSubscription::DeviceName).string_len(128))
                    .col(
                        ColumnDef::new(PushSubscription::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(PushSubscription::LastUsedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(PushSubscription::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(PushSubscription::UpdatedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_push_subscription_user")
                            .from(PushSubscription::Table, PushSubscription::UserId)
                            .to(AppUser::Table, AppUser::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique: (user_id, endpoint) — one subscription per device endpoint
        manager
            .create_index(
                Index::create()
                    .name("idx_push_subscription_user_endpoint")
                    .table(PushSubscription::Table)
                    .col(PushSubscription::UserId)
                    .col(PushSubscription::Endpoint)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: (user_id, is_active) (for delivery fan-out)
        manager
            .create_index(
                Index::create()
                    .name("idx_push_subscription_user_is_active")
                    .table(PushSubscription::Table)
                    .col(PushSubscription::UserId)
                    .col(PushSubscription::IsActive)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PushSubscription::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum PushSubscription {
    Table,
    Id,
    UserId,
    Endpoint,
    P256dh,
    Auth,
    UserAgent,
    DeviceName,
    IsActive,
    LastUsedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum AppUser {
    Table,
    Id,
}

//! Create request table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Request::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Request::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Request::RequestNumber)
                            .string_len(32)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Request::UniqueCode)
                            .string_len(12)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Request::UserId).integer().not_null())
                    .col(ColumnDef::new(Request::Status).string_len(32).not_null())
                    .col(
                        ColumnDef::new(Request::IsArchived)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Request::FullName).string_len(255).not_null())
                    .col(
                        ColumnDef::new(Request::PersonalNumber)
                            .string_len(9)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Request::PhoneNumber)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Request::BuildingName)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Request::RoadName).string_len(255).not_null())
                    .col(
                        ColumnDef::new(Request::BuildingNumber)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Request::CivilDefenseFileNumber).string_len(64))
                    .col(ColumnDef::new(Request::BuildingPermitNumber).string_len(64))
                    .col(
                        ColumnDef::new(Request::LicensesSection)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Request::FireEquipmentSection)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Request::CommercialRecordsSection)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Request::EngineeringOfficesSection)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Request::HazardousMaterialsSection)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Request::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Request::UpdatedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_request_user")
                            .from(Request::Table, Request::UserId)
                            .to(AppUser::Table, AppUser::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: user_id (for listing a user's requests)
        manager
            .create_index(
                Index::create()
                    .name("idx_request_user_id")
                    .table(Request::Table)
                    .col(Request::UserId)
                    .to_owned(),
            )
            .await?;

        // Index: (status, is_archived) (for dashboard filters)
        manager
            .create_index(
                Index::create()
                    .name("idx_request_status_is_archived")
                    .table(Request::Table)
                    .col(Request::Status)
                    .col(Request::IsArchived)
                    .to_owned(),
            )
            .await?;

        // Index: created_at (for pagination)
        manager
            .create_index(
                Index::create()
                    .name("idx_request_created_at")
                    .table(Request::Table)
                    .col(Request::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Request::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Request {
    Table,
    Id,
    RequestNumber,
    UniqueCode,
    UserId,
    Status,
    IsArchived,
    FullName,
    PersonalNumber,
    PhoneNumber,
    BuildingName,
    RoadName,
    BuildingNumber,
    CivilDefenseFileNumber,
    BuildingPermitNumber,
    LicensesSection,
    FireEquipmentSection,
    CommercialRecordsSection,
    EngineeringOfficesSection,
    HazardousMaterialsSection,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum AppUser {
    Table,
    Id,
}

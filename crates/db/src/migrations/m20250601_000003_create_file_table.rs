//! Create file table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(File::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(File::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(File::RequestId).integer().not_null())
                    .col(
                        ColumnDef::new(File::OriginalFilename)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(File::StoredFilename)
                            .string_len(255)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(File::FilePath).text().not_null())
                    .col(ColumnDef::new(File::FileSize).big_integer().not_null())
                    .col(ColumnDef::new(File::MimeType).string_len(128).not_null())
                    .col(ColumnDef::new(File::FileType).string_len(16).not_null())
                    .col(ColumnDef::new(File::FileCategory).string_len(50).not_null())
                    .col(
                        ColumnDef::new(File::UploadedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_file_request")
                            .from(File::Table, File::RequestId)
                            .to(Request::Table, Request::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: request_id (for listing a request's attachments)
        manager
            .create_index(
                Index::create()
                    .name("idx_file_request_id")
                    .table(File::Table)
                    .col(File::RequestId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(File::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum File {
    Table,
    Id,
    RequestId,
    OriginalFilename,
    StoredFilename,
    FilePath,
    FileSize,
    MimeType,
    FileType,
    FileCategory,
    UploadedAt,
}

#[derive(Iden)]
enum Request {
    Table,
    Id,
}

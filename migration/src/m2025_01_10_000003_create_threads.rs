//! Migration to create the threads table.

use sea_orm_migration::prelude::*;

use crate::m2025_01_10_000001_create_users::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Threads::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Threads::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Threads::UserId).uuid().not_null())
                    // Null for locally composed drafts that have no provider id yet.
                    .col(ColumnDef::new(Threads::ExternalId).text().null())
                    .col(ColumnDef::new(Threads::Subject).text().not_null())
                    .col(ColumnDef::new(Threads::Snippet).text().not_null())
                    .col(
                        ColumnDef::new(Threads::Folder)
                            .string_len(16)
                            .not_null()
                            .default("INBOX"),
                    )
                    .col(
                        ColumnDef::new(Threads::LastMessageAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Threads::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Threads::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_threads_user_id")
                            .from(Threads::Table, Threads::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_threads_external_id")
                    .table(Threads::Table)
                    .col(Threads::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Folder listing: WHERE user_id = ? AND folder = ? ORDER BY last_message_at DESC
        manager
            .create_index(
                Index::create()
                    .name("idx_threads_user_folder_recency")
                    .table(Threads::Table)
                    .col(Threads::UserId)
                    .col(Threads::Folder)
                    .col(Threads::LastMessageAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_threads_external_id").to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_threads_user_folder_recency")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(Threads::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum Threads {
    Table,
    Id,
    UserId,
    ExternalId,
    Subject,
    Snippet,
    Folder,
    LastMessageAt,
    CreatedAt,
    UpdatedAt,
}

//! Migration to create the emails table.

use sea_orm_migration::prelude::*;

use crate::m2025_01_10_000001_create_users::Users;
use crate::m2025_01_10_000003_create_threads::Threads;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Emails::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Emails::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Emails::UserId).uuid().not_null())
                    .col(ColumnDef::new(Emails::ThreadId).uuid().not_null())
                    .col(ColumnDef::new(Emails::ExternalId).text().not_null())
                    .col(ColumnDef::new(Emails::FromAddr).text().not_null())
                    .col(ColumnDef::new(Emails::ToAddrs).text().not_null())
                    .col(ColumnDef::new(Emails::Subject).text().not_null())
                    .col(ColumnDef::new(Emails::Body).text().not_null())
                    .col(ColumnDef::new(Emails::BodyHtml).text().null())
                    .col(
                        ColumnDef::new(Emails::IsRead)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Emails::SentAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Emails::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Emails::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_emails_thread_id")
                            .from(Emails::Table, Emails::ThreadId)
                            .to(Threads::Table, Threads::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_emails_user_id")
                            .from(Emails::Table, Emails::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_emails_external_id")
                    .table(Emails::Table)
                    .col(Emails::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_emails_thread_sent_at")
                    .table(Emails::Table)
                    .col(Emails::ThreadId)
                    .col(Emails::SentAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_emails_external_id").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_emails_thread_sent_at").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Emails::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Emails {
    Table,
    Id,
    UserId,
    ThreadId,
    ExternalId,
    FromAddr,
    ToAddrs,
    Subject,
    Body,
    BodyHtml,
    IsRead,
    SentAt,
    CreatedAt,
    UpdatedAt,
}

//! Migration to create the linked_accounts table.
//!
//! One row per OAuth-linked mailbox. Tokens are stored as AES-GCM ciphertext;
//! `expires_at` is nullable because not every provider reports a lifetime.

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
                    .table(LinkedAccounts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LinkedAccounts::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LinkedAccounts::UserId).uuid().not_null())
                    .col(ColumnDef::new(LinkedAccounts::Provider).text().not_null())
                    .col(
                        ColumnDef::new(LinkedAccounts::ProviderAccountId)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LinkedAccounts::Email).text().not_null())
                    .col(
                        ColumnDef::new(LinkedAccounts::AccessTokenCiphertext)
                            .binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LinkedAccounts::RefreshTokenCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(LinkedAccounts::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(LinkedAccounts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(LinkedAccounts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_linked_accounts_user_id")
                            .from(LinkedAccounts::Table, LinkedAccounts::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_linked_accounts_provider_account")
                    .table(LinkedAccounts::Table)
                    .col(LinkedAccounts::Provider)
                    .col(LinkedAccounts::ProviderAccountId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_linked_accounts_user_id")
                    .table(LinkedAccounts::Table)
                    .col(LinkedAccounts::UserId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_linked_accounts_provider_account")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(Index::drop().name("idx_linked_accounts_user_id").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LinkedAccounts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum LinkedAccounts {
    Table,
    Id,
    UserId,
    Provider,
    ProviderAccountId,
    Email,
    AccessTokenCiphertext,
    RefreshTokenCiphertext,
    ExpiresAt,
    CreatedAt,
    UpdatedAt,
}

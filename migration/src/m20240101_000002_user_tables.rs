use sea_orm_migration::{prelude::*, schema::*};

use crate::iden::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let table = table_auto(User::Table)
            .col(string(User::Id).primary_key())
            .col(string_uniq(User::Email))
            .col(string_null(User::PasswordHash))
            .col(string(User::Role))
            .col(string_null(User::MemberId))
            .foreign_key(
                ForeignKey::create()
                    .name("fk_user_member")
                    .from(User::Table, User::MemberId)
                    .to(Member::Table, Member::Id)
                    .on_delete(ForeignKeyAction::SetNull),
            )
            .to_owned();
        manager.create_table(table).await?;

        let table = table_auto(Invitation::Table)
            .col(string(Invitation::Id).primary_key())
            .col(string(Invitation::Email))
            .col(string(Invitation::Role))
            .col(string_null(Invitation::MemberId))
            .col(string_uniq(Invitation::TokenHash))
            .col(date_time(Invitation::ExpiresAt))
            .col(date_time_null(Invitation::AcceptedAt))
            .to_owned();
        manager.create_table(table).await?;

        let table = table_auto(PasswordReset::Table)
            .col(string(PasswordReset::Id).primary_key())
            .col(string(PasswordReset::UserId))
            .col(string_uniq(PasswordReset::TokenHash))
            .col(date_time(PasswordReset::ExpiresAt))
            .col(date_time_null(PasswordReset::UsedAt))
            .foreign_key(
                ForeignKey::create()
                    .name("fk_password_reset_user")
                    .from(PasswordReset::Table, PasswordReset::UserId)
                    .to(User::Table, User::Id)
                    .on_delete(ForeignKeyAction::Cascade),
            )
            .to_owned();
        manager.create_table(table).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PasswordReset::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Invitation::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(User::Table).to_owned())
            .await?;

        Ok(())
    }
}

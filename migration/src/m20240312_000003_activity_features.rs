use sea_orm_migration::{prelude::*, schema::*};

use crate::iden::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let table = table_auto(Message::Table)
            .col(string(Message::Id).primary_key())
            .col(string(Message::ActivityId))
            .col(string_null(Message::AuthorUserId))
            .col(text(Message::Body))
            .col(date_time(Message::PostedAt))
            .to_owned();
        manager.create_table(table).await?;

        let table = table_auto(Guest::Table)
            .col(string(Guest::Id).primary_key())
            .col(string(Guest::ActivityId))
            .col(string(Guest::Name))
            .col(string_null(Guest::Email))
            .col(string_null(Guest::Phone))
            .col(text_null(Guest::Note))
            .col(boolean(Guest::CheckedIn).default(false))
            .to_owned();
        manager.create_table(table).await?;

        let table = table_auto(GuestChild::Table)
            .col(string(GuestChild::Id).primary_key())
            .col(string(GuestChild::GuestId))
            .col(string(GuestChild::ActivityId))
            .col(string(GuestChild::Name))
            .col(integer_null(GuestChild::Age))
            .col(text_null(GuestChild::Note))
            .to_owned();
        manager.create_table(table).await?;

        let table = table_auto(Volunteer::Table)
            .col(string(Volunteer::Id).primary_key())
            .col(string(Volunteer::ActivityId))
            .col(string_null(Volunteer::MemberId))
            .col(string(Volunteer::Name))
            .col(string_null(Volunteer::RoleTitle))
            .col(string_null(Volunteer::Contact))
            .to_owned();
        manager.create_table(table).await?;

        let table = table_auto(Task::Table)
            .col(string(Task::Id).primary_key())
            .col(string(Task::ActivityId))
            .col(string_null(Task::AssignedMemberId))
            .col(string(Task::Title))
            .col(text_null(Task::Description))
            .col(date_null(Task::DueDate))
            .col(boolean(Task::Done).default(false))
            .to_owned();
        manager.create_table(table).await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_message_activity")
                    .table(Message::Table)
                    .col(Message::ActivityId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_guest_activity")
                    .table(Guest::Table)
                    .col(Guest::ActivityId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_guest_child_guest")
                    .table(GuestChild::Table)
                    .col(GuestChild::GuestId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_volunteer_activity")
                    .table(Volunteer::Table)
                    .col(Volunteer::ActivityId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_task_activity")
                    .table(Task::Table)
                    .col(Task::ActivityId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Task::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Volunteer::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(GuestChild::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Guest::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Message::Table).to_owned())
            .await?;

        Ok(())
    }
}

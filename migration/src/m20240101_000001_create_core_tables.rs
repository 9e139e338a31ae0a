use sea_orm_migration::{prelude::*, schema::*};

use crate::iden::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let table = table_auto(Member::Table)
            .col(string(Member::Id).primary_key())
            .col(string(Member::FirstName))
            .col(string(Member::LastName))
            .col(string_null(Member::Email))
            .col(string_null(Member::Phone))
            .col(string_null(Member::Address))
            .col(date_null(Member::BirthDate))
            .col(string_null(Member::GuardianName))
            .col(string_null(Member::GuardianEmail))
            .col(string_null(Member::GuardianPhone))
            .col(text_null(Member::MedicalNotes))
            .col(text_null(Member::Allergies))
            .col(boolean(Member::Archived).default(false))
            .to_owned();
        manager.create_table(table).await?;

        let table = table_auto(Activity::Table)
            .col(string(Activity::Id).primary_key())
            .col(string(Activity::Name))
            .col(string(Activity::Kind))
            .col(text_null(Activity::Description))
            .col(string_null(Activity::Location))
            .col(date_time_null(Activity::StartsAt))
            .col(date_time_null(Activity::EndsAt))
            .col(integer_null(Activity::Capacity))
            .col(boolean(Activity::HasGuests).default(false))
            .col(boolean(Activity::HasAttendance).default(false))
            .col(boolean(Activity::HasVolunteers).default(false))
            .col(boolean(Activity::HasTasks).default(false))
            .col(boolean(Activity::Archived).default(false))
            .to_owned();
        manager.create_table(table).await?;

        // Enrollments keep soft references so archived or hard-deleted rows
        // never block each other; the cascade helpers clean them up.
        let table = table_auto(Enrollment::Table)
            .col(string(Enrollment::Id).primary_key())
            .col(string(Enrollment::MemberId))
            .col(string(Enrollment::ActivityId))
            .col(string(Enrollment::Role))
            .to_owned();
        manager.create_table(table).await?;

        let table = table_auto(Session::Table)
            .col(string(Session::Id).primary_key())
            .col(string(Session::ActivityId))
            .col(string(Session::Title))
            .col(date_time(Session::StartsAt))
            .col(date_time(Session::EndsAt))
            .col(string_null(Session::Location))
            .col(json(Session::TargetMemberIds))
            .to_owned();
        manager.create_table(table).await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_enrollment_member_activity")
                    .table(Enrollment::Table)
                    .col(Enrollment::MemberId)
                    .col(Enrollment::ActivityId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_enrollment_activity")
                    .table(Enrollment::Table)
                    .col(Enrollment::ActivityId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_session_activity")
                    .table(Session::Table)
                    .col(Session::ActivityId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_member_email")
                    .table(Member::Table)
                    .col(Member::Email)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Session::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Enrollment::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Activity::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Member::Table).to_owned())
            .await?;

        Ok(())
    }
}

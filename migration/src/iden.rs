use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
pub enum Member {
    Table,
    Id,
    FirstName,
    LastName,
    Email,
    Phone,
    Address,
    BirthDate,
    GuardianName,
    GuardianEmail,
    GuardianPhone,
    MedicalNotes,
    Allergies,
    Archived,
}

#[derive(DeriveIden)]
pub enum Activity {
    Table,
    Id,
    Name,
    Kind,
    Description,
    Location,
    StartsAt,
    EndsAt,
    Capacity,
    HasGuests,
    HasAttendance,
    HasVolunteers,
    HasTasks,
    Archived,
}

#[derive(DeriveIden)]
pub enum Enrollment {
    Table,
    Id,
    MemberId,
    ActivityId,
    Role,
}

#[derive(DeriveIden)]
pub enum Session {
    Table,
    Id,
    ActivityId,
    Title,
    StartsAt,
    EndsAt,
    Location,
    TargetMemberIds,
}

#[derive(DeriveIden)]
pub enum Message {
    Table,
    Id,
    ActivityId,
    AuthorUserId,
    Body,
    PostedAt,
}

#[derive(DeriveIden)]
pub enum Guest {
    Table,
    Id,
    ActivityId,
    Name,
    Email,
    Phone,
    Note,
    CheckedIn,
}

#[derive(DeriveIden)]
pub enum GuestChild {
    Table,
    Id,
    GuestId,
    ActivityId,
    Name,
    Age,
    Note,
}

#[derive(DeriveIden)]
pub enum Volunteer {
    Table,
    Id,
    ActivityId,
    MemberId,
    Name,
    RoleTitle,
    Contact,
}

#[derive(DeriveIden)]
pub enum Task {
    Table,
    Id,
    ActivityId,
    AssignedMemberId,
    Title,
    Description,
    DueDate,
    Done,
}

#[derive(DeriveIden)]
pub enum User {
    Table,
    Id,
    Email,
    PasswordHash,
    Role,
    MemberId,
}

#[derive(DeriveIden)]
pub enum Invitation {
    Table,
    Id,
    Email,
    Role,
    MemberId,
    TokenHash,
    ExpiresAt,
    AcceptedAt,
}

#[derive(DeriveIden)]
pub enum PasswordReset {
    Table,
    Id,
    UserId,
    TokenHash,
    ExpiresAt,
    UsedAt,
}

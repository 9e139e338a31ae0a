//! Fixtures shared by the unit tests.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set};
use uuid::Uuid;

use crate::config::Config;
use crate::entities::{
    activity, enrollment, guest, guest_child, member, message, session, task, user, volunteer,
};
use crate::mirror::Mirror;
use crate::router::{AppState, setup_templates};
use crate::storage::{FileStorage, tests::temp_dir};

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn at(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 9, 2)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

/// An empty in-memory SQLite database. One connection, so every query sees
/// the same memory.
pub async fn bare_memory_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    Database::connect(options).await.unwrap()
}

pub async fn memory_db() -> DatabaseConnection {
    let db = bare_memory_db().await;
    Migrator::up(&db, None).await.unwrap();
    db
}

pub fn config() -> Config {
    Config {
        database_url: "sqlite::memory:".into(),
        rust_log: "debug".into(),
        bind_addr: "127.0.0.1:0".into(),
        mirror_dir: temp_dir("ansattportal-mirror"),
        files_dir: temp_dir("ansattportal-files"),
        max_upload_bytes: 1024 * 1024,
        session_secure: false,
        reset_token_ttl_minutes: 60,
        invitation_ttl_hours: 72,
        bootstrap_admin: None,
    }
}

/// Full application state over a migrated in-memory database, an in-memory
/// mirror and a throwaway files directory.
pub async fn app_state() -> AppState {
    let config = config();
    AppState {
        db: memory_db().await,
        mirror: Mirror::in_memory(),
        files: FileStorage::open(&config.files_dir).await.unwrap(),
        templates: Arc::new(setup_templates()),
        config: Arc::new(config),
    }
}

/// Emails are unique per member, so each fixture gets its own address.
pub async fn insert_member(db: &DatabaseConnection, first: &str, last: &str) -> member::Model {
    let id = new_id();
    let email = format!("{}.{}@example.org", first.to_lowercase(), &id[..8]);
    member::ActiveModel {
        id: Set(id),
        first_name: Set(first.to_string()),
        last_name: Set(last.to_string()),
        email: Set(Some(email)),
        phone: Set(None),
        address: Set(None),
        birth_date: Set(None),
        guardian_name: Set(None),
        guardian_email: Set(None),
        guardian_phone: Set(None),
        medical_notes: Set(None),
        allergies: Set(None),
        archived: Set(false),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_activity(db: &DatabaseConnection, name: &str) -> activity::Model {
    activity::ActiveModel {
        id: Set(new_id()),
        name: Set(name.to_string()),
        kind: Set(activity::ActivityKind::Offer),
        description: Set(None),
        location: Set(None),
        starts_at: Set(None),
        ends_at: Set(None),
        capacity: Set(None),
        has_guests: Set(true),
        has_attendance: Set(false),
        has_volunteers: Set(true),
        has_tasks: Set(true),
        archived: Set(false),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_enrollment(
    db: &DatabaseConnection,
    member_id: &str,
    activity_id: &str,
    role: enrollment::EnrollmentRole,
) -> enrollment::Model {
    enrollment::ActiveModel {
        id: Set(new_id()),
        member_id: Set(member_id.to_string()),
        activity_id: Set(activity_id.to_string()),
        role: Set(role),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_session(
    db: &DatabaseConnection,
    activity_id: &str,
    targets: &[&str],
) -> session::Model {
    session::ActiveModel {
        id: Set(new_id()),
        activity_id: Set(activity_id.to_string()),
        title: Set("Trening".to_string()),
        starts_at: Set(at(17)),
        ends_at: Set(at(18)),
        location: Set(None),
        target_member_ids: Set(serde_json::json!(targets)),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_message(db: &DatabaseConnection, activity_id: &str, body: &str) -> message::Model {
    message::ActiveModel {
        id: Set(new_id()),
        activity_id: Set(activity_id.to_string()),
        author_user_id: Set(None),
        body: Set(body.to_string()),
        posted_at: Set(at(8)),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_guest(db: &DatabaseConnection, activity_id: &str, name: &str) -> guest::Model {
    guest::ActiveModel {
        id: Set(new_id()),
        activity_id: Set(activity_id.to_string()),
        name: Set(name.to_string()),
        email: Set(None),
        phone: Set(None),
        note: Set(None),
        checked_in: Set(false),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_guest_child(
    db: &DatabaseConnection,
    parent: &guest::Model,
    name: &str,
) -> guest_child::Model {
    guest_child::ActiveModel {
        id: Set(new_id()),
        guest_id: Set(parent.id.clone()),
        activity_id: Set(parent.activity_id.clone()),
        name: Set(name.to_string()),
        age: Set(Some(6)),
        note: Set(None),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_volunteer(
    db: &DatabaseConnection,
    activity_id: &str,
    member_id: Option<&str>,
) -> volunteer::Model {
    volunteer::ActiveModel {
        id: Set(new_id()),
        activity_id: Set(activity_id.to_string()),
        member_id: Set(member_id.map(str::to_string)),
        name: Set("Kioskvakt".to_string()),
        role_title: Set(None),
        contact: Set(None),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_task(
    db: &DatabaseConnection,
    activity_id: &str,
    member_id: Option<&str>,
) -> task::Model {
    task::ActiveModel {
        id: Set(new_id()),
        activity_id: Set(activity_id.to_string()),
        assigned_member_id: Set(member_id.map(str::to_string)),
        title: Set("Kjøp inn saft".to_string()),
        description: Set(None),
        due_date: Set(None),
        done: Set(false),
    }
    .insert(db)
    .await
    .unwrap()
}

pub async fn insert_user(
    db: &DatabaseConnection,
    email: &str,
    role: user::UserRole,
    member_id: Option<&str>,
) -> user::Model {
    user::ActiveModel {
        id: Set(new_id()),
        email: Set(email.to_string()),
        password_hash: Set(Some(crate::auth::password::hash_password("hemmelig123").unwrap())),
        role: Set(role),
        member_id: Set(member_id.map(str::to_string)),
    }
    .insert(db)
    .await
    .unwrap()
}

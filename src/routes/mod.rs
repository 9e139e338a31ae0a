use axum::Router;
use sea_orm::{ConnectionTrait, EntityTrait};
use serde::{Deserialize, Deserializer};

use crate::entities::activity;
use crate::error::{AppError, AppResult};
use crate::router::AppState;

pub mod activities;
pub mod admin;
pub mod dashboard;
pub mod enrollments;
pub mod files;
pub mod guests;
pub mod me;
pub mod members;
pub mod messages;
pub mod sessions;
pub mod tasks;
pub mod volunteers;

/// Everything mounted under `/api`.
pub fn api() -> Router<AppState> {
    Router::new()
        .merge(activities::routes())
        .merge(enrollments::routes())
        .merge(sessions::routes())
        .merge(messages::routes())
        .merge(guests::routes())
        .merge(volunteers::routes())
        .merge(tasks::routes())
        .merge(files::routes())
        .merge(members::routes())
        .merge(me::routes())
        .nest("/admin", admin::routes())
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Lets PATCH bodies tell "absent" (`None`) from "null" (`Some(None)`).
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Trimmed, non-empty text.
pub fn required(field: &str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Blank optional text is stored as NULL.
pub fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub async fn find_activity<C: ConnectionTrait>(db: &C, id: &str) -> AppResult<activity::Model> {
    activity::Entity::find_by_id(id.to_string())
        .one(db)
        .await?
        .ok_or(AppError::NotFound("Activity"))
}

#[derive(Debug, Clone, Copy)]
pub enum Feature {
    Guests,
    Volunteers,
    Tasks,
}

/// Guest lists, volunteers and tasks only exist on activities that turned
/// them on.
pub fn require_feature(activity: &activity::Model, feature: Feature) -> AppResult<()> {
    let (enabled, name) = match feature {
        Feature::Guests => (activity.has_guests, "Guest list"),
        Feature::Volunteers => (activity.has_volunteers, "Volunteers"),
        Feature::Tasks => (activity.has_tasks, "Tasks"),
    };
    if enabled {
        Ok(())
    } else {
        Err(AppError::conflict(format!(
            "{name} is not enabled for this activity"
        )))
    }
}

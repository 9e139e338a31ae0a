use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::NaiveDateTime;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{find_activity, new_id, nullable, optional, required};
use crate::auth::access::{Access, require_access, require_admin, require_user, visible_activity_ids};
use crate::auth::user::AuthSession;
use crate::entities::activity::{self, ActivityKind};
use crate::error::{AppError, AppResult};
use crate::mirror::MirroredActivity;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    #[serde(default)]
    pub include_archived: bool,
    pub kind: Option<ActivityKind>,
}

#[derive(Debug, Deserialize)]
pub struct NewActivity {
    pub name: String,
    pub kind: ActivityKind,
    pub description: Option<String>,
    pub location: Option<String>,
    pub starts_at: Option<NaiveDateTime>,
    pub ends_at: Option<NaiveDateTime>,
    pub capacity: Option<i32>,
    #[serde(default)]
    pub has_guests: bool,
    #[serde(default)]
    pub has_attendance: bool,
    #[serde(default)]
    pub has_volunteers: bool,
    #[serde(default)]
    pub has_tasks: bool,
    pub cover: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityPatch {
    pub name: Option<String>,
    pub kind: Option<ActivityKind>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub location: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub starts_at: Option<Option<NaiveDateTime>>,
    #[serde(default, deserialize_with = "nullable")]
    pub ends_at: Option<Option<NaiveDateTime>>,
    #[serde(default, deserialize_with = "nullable")]
    pub capacity: Option<Option<i32>>,
    pub has_guests: Option<bool>,
    pub has_attendance: Option<bool>,
    pub has_volunteers: Option<bool>,
    pub has_tasks: Option<bool>,
    pub archived: Option<bool>,
    pub cover: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActivityView {
    #[serde(flatten)]
    pub activity: activity::Model,
    pub cover: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/activities", get(list_activities).post(create_activity))
        .route(
            "/activities/{id}",
            get(get_activity)
                .patch(update_activity)
                .delete(archive_activity),
        )
}

fn check_schedule(
    starts_at: Option<NaiveDateTime>,
    ends_at: Option<NaiveDateTime>,
    capacity: Option<i32>,
) -> AppResult<()> {
    if let (Some(starts_at), Some(ends_at)) = (starts_at, ends_at) {
        if ends_at < starts_at {
            return Err(AppError::bad_request("An activity cannot end before it starts"));
        }
    }
    if capacity.is_some_and(|c| c < 0) {
        return Err(AppError::bad_request("Capacity cannot be negative"));
    }
    Ok(())
}

fn view(state: &AppState, activity: activity::Model) -> ActivityView {
    let cover = state.mirror.cover(&activity.id);
    ActivityView { activity, cover }
}

pub async fn list_visible(
    state: &AppState,
    user: &crate::entities::user::Model,
    query: &ActivityQuery,
) -> AppResult<Vec<activity::Model>> {
    let mut select = activity::Entity::find()
        .order_by_asc(activity::Column::StartsAt)
        .order_by_asc(activity::Column::Name);
    if !query.include_archived {
        select = select.filter(activity::Column::Archived.eq(false));
    }
    if let Some(kind) = query.kind {
        select = select.filter(activity::Column::Kind.eq(kind));
    }
    if let Some(ids) = visible_activity_ids(&state.db, user).await? {
        select = select.filter(activity::Column::Id.is_in(ids));
    }
    Ok(select.all(&state.db).await?)
}

pub async fn list_activities(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Query(query): Query<ActivityQuery>,
) -> AppResult<Json<Vec<ActivityView>>> {
    let user = require_user(&auth_session)?;
    let activities = list_visible(&state, &user, &query).await?;
    Ok(Json(activities.into_iter().map(|a| view(&state, a)).collect()))
}

pub async fn create_activity(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Json(body): Json<NewActivity>,
) -> AppResult<impl IntoResponse> {
    require_admin(&auth_session)?;
    check_schedule(body.starts_at, body.ends_at, body.capacity)?;

    let created = activity::ActiveModel {
        id: Set(new_id()),
        name: Set(required("Name", &body.name)?),
        kind: Set(body.kind),
        description: Set(optional(body.description)),
        location: Set(optional(body.location)),
        starts_at: Set(body.starts_at),
        ends_at: Set(body.ends_at),
        capacity: Set(body.capacity),
        has_guests: Set(body.has_guests),
        has_attendance: Set(body.has_attendance),
        has_volunteers: Set(body.has_volunteers),
        has_tasks: Set(body.has_tasks),
        archived: Set(false),
    }
    .insert(&state.db)
    .await?;

    state.mirror.upsert_activity(MirroredActivity::from(&created));
    if let Some(cover) = optional(body.cover) {
        state.mirror.set_cover(&created.id, &cover);
    }
    debug!("Created activity {}", created.id);

    Ok((StatusCode::CREATED, Json(view(&state, created))))
}

pub async fn get_activity(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<Json<ActivityView>> {
    let user = require_user(&auth_session)?;
    let activity = find_activity(&state.db, &id).await?;
    require_access(&state.db, &user, &id, Access::Participant).await?;
    Ok(Json(view(&state, activity)))
}

pub async fn update_activity(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
    Json(patch): Json<ActivityPatch>,
) -> AppResult<Json<ActivityView>> {
    let user = require_user(&auth_session)?;
    let existing = find_activity(&state.db, &id).await?;
    let access = require_access(&state.db, &user, &id, Access::Leader).await?;
    if patch.archived.is_some() && access < Access::Admin {
        return Err(AppError::Forbidden);
    }

    let starts_at = patch.starts_at.unwrap_or(existing.starts_at);
    let ends_at = patch.ends_at.unwrap_or(existing.ends_at);
    let capacity = patch.capacity.unwrap_or(existing.capacity);
    check_schedule(starts_at, ends_at, capacity)?;

    let mut model = existing.into_active_model();
    if let Some(name) = patch.name {
        model.name = Set(required("Name", &name)?);
    }
    if let Some(kind) = patch.kind {
        model.kind = Set(kind);
    }
    if let Some(description) = patch.description {
        model.description = Set(optional(description));
    }
    if let Some(location) = patch.location {
        model.location = Set(optional(location));
    }
    model.starts_at = Set(starts_at);
    model.ends_at = Set(ends_at);
    model.capacity = Set(capacity);
    if let Some(flag) = patch.has_guests {
        model.has_guests = Set(flag);
    }
    if let Some(flag) = patch.has_attendance {
        model.has_attendance = Set(flag);
    }
    if let Some(flag) = patch.has_volunteers {
        model.has_volunteers = Set(flag);
    }
    if let Some(flag) = patch.has_tasks {
        model.has_tasks = Set(flag);
    }
    if let Some(archived) = patch.archived {
        model.archived = Set(archived);
    }
    let updated = model.update(&state.db).await?;

    state.mirror.upsert_activity(MirroredActivity::from(&updated));
    if let Some(cover) = optional(patch.cover) {
        state.mirror.set_cover(&updated.id, &cover);
    }

    Ok(Json(view(&state, updated)))
}

/// Archiving is the everyday delete; rows stay for history.
pub async fn archive_activity(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<Json<ActivityView>> {
    require_admin(&auth_session)?;
    let mut model = find_activity(&state.db, &id).await?.into_active_model();
    model.archived = Set(true);
    let archived = model.update(&state.db).await?;

    state.mirror.upsert_activity(MirroredActivity::from(&archived));
    debug!("Archived activity {}", archived.id);

    Ok(Json(view(&state, archived)))
}

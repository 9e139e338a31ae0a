use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
};
use chrono::NaiveDateTime;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{find_activity, new_id, nullable, optional, required};
use crate::auth::access::{Access, require_access, require_user};
use crate::auth::user::AuthSession;
use crate::entities::{enrollment, session};
use crate::error::{AppError, AppResult};
use crate::mirror::{Mirror, MirroredSession};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct NewSession {
    pub title: String,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub location: Option<String>,
    /// Empty means everyone enrolled right now.
    #[serde(default)]
    pub target_member_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub starts_at: Option<NaiveDateTime>,
    pub ends_at: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "nullable")]
    pub location: Option<Option<String>>,
    pub target_member_ids: Option<Vec<String>>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/activities/{id}/sessions",
            get(list_sessions).post(post_session),
        )
        .route(
            "/sessions/{id}",
            patch(patch_session).delete(delete_session),
        )
}

fn check_times(starts_at: NaiveDateTime, ends_at: NaiveDateTime) -> AppResult<()> {
    if ends_at < starts_at {
        return Err(AppError::bad_request("A session cannot end before it starts"));
    }
    Ok(())
}

/// Explicit targets are kept in order without duplicates; an empty list
/// expands to the activity's current enrollments.
async fn resolve_targets<C: ConnectionTrait>(
    db: &C,
    activity_id: &str,
    requested: Vec<String>,
) -> AppResult<Vec<String>> {
    if requested.is_empty() {
        return Ok(enrollment::Entity::find()
            .select_only()
            .column(enrollment::Column::MemberId)
            .filter(enrollment::Column::ActivityId.eq(activity_id))
            .order_by_asc(enrollment::Column::MemberId)
            .into_tuple::<String>()
            .all(db)
            .await?);
    }

    let mut targets: Vec<String> = Vec::with_capacity(requested.len());
    for id in requested {
        let id = id.trim().to_string();
        if !id.is_empty() && !targets.contains(&id) {
            targets.push(id);
        }
    }
    Ok(targets)
}

pub async fn create_session<C: ConnectionTrait>(
    db: &C,
    mirror: &Mirror,
    activity_id: &str,
    new: NewSession,
) -> AppResult<session::Model> {
    check_times(new.starts_at, new.ends_at)?;
    let targets = resolve_targets(db, activity_id, new.target_member_ids).await?;

    let created = session::ActiveModel {
        id: Set(new_id()),
        activity_id: Set(activity_id.to_string()),
        title: Set(required("Title", &new.title)?),
        starts_at: Set(new.starts_at),
        ends_at: Set(new.ends_at),
        location: Set(optional(new.location)),
        target_member_ids: Set(json!(targets)),
    }
    .insert(db)
    .await?;

    mirror.upsert_session(MirroredSession::from(&created));
    debug!(
        "Session {} created for {} members",
        created.id,
        targets.len()
    );
    Ok(created)
}

pub async fn update_session<C: ConnectionTrait>(
    db: &C,
    mirror: &Mirror,
    existing: session::Model,
    patch: SessionPatch,
) -> AppResult<session::Model> {
    let starts_at = patch.starts_at.unwrap_or(existing.starts_at);
    let ends_at = patch.ends_at.unwrap_or(existing.ends_at);
    check_times(starts_at, ends_at)?;

    let targets = match patch.target_member_ids {
        Some(requested) => Some(resolve_targets(db, &existing.activity_id, requested).await?),
        None => None,
    };

    let mut model = existing.into_active_model();
    if let Some(title) = patch.title {
        model.title = Set(required("Title", &title)?);
    }
    model.starts_at = Set(starts_at);
    model.ends_at = Set(ends_at);
    if let Some(location) = patch.location {
        model.location = Set(optional(location));
    }
    if let Some(targets) = targets {
        model.target_member_ids = Set(json!(targets));
    }
    let updated = model.update(db).await?;

    mirror.upsert_session(MirroredSession::from(&updated));
    Ok(updated)
}

async fn find_session<C: ConnectionTrait>(db: &C, id: &str) -> AppResult<session::Model> {
    session::Entity::find_by_id(id.to_string())
        .one(db)
        .await?
        .ok_or(AppError::NotFound("Session"))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<session::Model>>> {
    let user = require_user(&auth_session)?;
    find_activity(&state.db, &id).await?;
    require_access(&state.db, &user, &id, Access::Participant).await?;

    let sessions = session::Entity::find()
        .filter(session::Column::ActivityId.eq(&id))
        .order_by_asc(session::Column::StartsAt)
        .all(&state.db)
        .await?;
    Ok(Json(sessions))
}

pub async fn post_session(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
    Json(body): Json<NewSession>,
) -> AppResult<impl IntoResponse> {
    let user = require_user(&auth_session)?;
    find_activity(&state.db, &id).await?;
    require_access(&state.db, &user, &id, Access::Leader).await?;

    let created = create_session(&state.db, &state.mirror, &id, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn patch_session(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
    Json(body): Json<SessionPatch>,
) -> AppResult<Json<session::Model>> {
    let user = require_user(&auth_session)?;
    let existing = find_session(&state.db, &id).await?;
    require_access(&state.db, &user, &existing.activity_id, Access::Leader).await?;

    let updated = update_session(&state.db, &state.mirror, existing, body).await?;
    Ok(Json(updated))
}

pub async fn delete_session(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let user = require_user(&auth_session)?;
    let existing = find_session(&state.db, &id).await?;
    require_access(&state.db, &user, &existing.activity_id, Access::Leader).await?;

    session::Entity::delete_by_id(existing.id.clone())
        .exec(&state.db)
        .await?;
    let removed = state.mirror.remove_session(&existing.id);
    debug!("Deleted session {}, mirror removal {:?}", existing.id, removed);

    Ok(StatusCode::NO_CONTENT)
}

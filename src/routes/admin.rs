//! Administrator tooling: accounts, hard deletes and mirror maintenance.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::optional;
use crate::auth::access::require_admin;
use crate::auth::account;
use crate::auth::user::AuthSession;
use crate::entities::user::{self, UserRole};
use crate::error::AppResult;
use crate::reconcile::{self, PurgeReport, ReconcileReport, cascade};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: UserRole,
    pub member_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NewInvitation {
    pub email: String,
    #[serde(default = "default_role")]
    pub role: UserRole,
    pub member_id: Option<String>,
}

fn default_role() -> UserRole {
    UserRole::Member
}

/// The plain token is only ever returned here.
#[derive(Debug, Serialize)]
pub struct IssuedInvitation {
    pub id: String,
    pub email: String,
    pub role: UserRole,
    pub expires_at: NaiveDateTime,
    pub token: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user))
        .route("/invitations", post(create_invitation))
        .route("/activities/{id}", delete(hard_delete_activity))
        .route("/members/{id}", delete(hard_delete_member))
        .route("/reconcile", get(reconcile_report))
        .route("/reconcile/purge", post(purge_mirror))
        .route("/mirror/keys", get(mirror_keys))
        .route("/mirror/migrate", post(migrate_mirror))
}

pub async fn create_user(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Json(body): Json<NewUser>,
) -> AppResult<impl IntoResponse> {
    require_admin(&auth_session)?;
    let created: user::Model = account::create_user(
        &state.db,
        &body.email,
        &body.password,
        body.role,
        optional(body.member_id),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn create_invitation(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Json(body): Json<NewInvitation>,
) -> AppResult<impl IntoResponse> {
    require_admin(&auth_session)?;
    let (invitation, token) = account::create_invitation(
        &state.db,
        &body.email,
        body.role,
        optional(body.member_id),
        state.config.invitation_ttl_hours,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(IssuedInvitation {
            id: invitation.id,
            email: invitation.email,
            role: invitation.role,
            expires_at: invitation.expires_at,
            token,
        }),
    ))
}

pub async fn hard_delete_activity(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<Json<cascade::CascadeReport>> {
    let admin = require_admin(&auth_session)?;
    info!("User {} requested hard delete of activity {}", admin.id, id);
    let report = cascade::hard_delete_activity(&state.db, &state.files, &state.mirror, &id).await?;
    Ok(Json(report))
}

pub async fn hard_delete_member(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<Json<cascade::CascadeReport>> {
    let admin = require_admin(&auth_session)?;
    info!("User {} requested hard delete of member {}", admin.id, id);
    let report = cascade::hard_delete_member(&state.db, &state.mirror, &id).await?;
    Ok(Json(report))
}

pub async fn reconcile_report(
    State(state): State<AppState>,
    auth_session: AuthSession,
) -> AppResult<Json<ReconcileReport>> {
    require_admin(&auth_session)?;
    Ok(Json(reconcile::scan(&state.db, &state.mirror).await?))
}

pub async fn purge_mirror(
    State(state): State<AppState>,
    auth_session: AuthSession,
) -> AppResult<Json<PurgeReport>> {
    require_admin(&auth_session)?;
    Ok(Json(reconcile::purge(&state.db, &state.mirror).await?))
}

pub async fn mirror_keys(
    State(state): State<AppState>,
    auth_session: AuthSession,
) -> AppResult<Json<Vec<String>>> {
    require_admin(&auth_session)?;
    let mut keys = state.mirror.keys();
    keys.sort();
    Ok(Json(keys))
}

pub async fn migrate_mirror(
    State(state): State<AppState>,
    auth_session: AuthSession,
) -> AppResult<impl IntoResponse> {
    require_admin(&auth_session)?;
    let migrated = state.mirror.migrate_legacy();
    Ok(Json(json!({ "migrated": migrated })))
}

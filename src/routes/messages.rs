use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::Deserialize;

use super::{find_activity, new_id, required};
use crate::auth::access::{Access, require_access, require_user};
use crate::auth::user::AuthSession;
use crate::entities::message;
use crate::error::AppResult;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct NewMessage {
    pub body: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route(
        "/activities/{id}/messages",
        get(list_messages).post(post_message),
    )
}

/// Newest first.
pub async fn list_messages(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<message::Model>>> {
    let user = require_user(&auth_session)?;
    find_activity(&state.db, &id).await?;
    require_access(&state.db, &user, &id, Access::Participant).await?;

    let messages = message::Entity::find()
        .filter(message::Column::ActivityId.eq(&id))
        .order_by_desc(message::Column::PostedAt)
        .all(&state.db)
        .await?;
    Ok(Json(messages))
}

pub async fn post_message(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
    Json(body): Json<NewMessage>,
) -> AppResult<impl IntoResponse> {
    let user = require_user(&auth_session)?;
    find_activity(&state.db, &id).await?;
    require_access(&state.db, &user, &id, Access::Leader).await?;

    let created = message::ActiveModel {
        id: Set(new_id()),
        activity_id: Set(id),
        author_user_id: Set(Some(user.id)),
        body: Set(required("Message", &body.body)?),
        posted_at: Set(Utc::now().naive_utc()),
    }
    .insert(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};
use serde::Deserialize;

use super::{Feature, find_activity, new_id, nullable, optional, required, require_feature};
use crate::auth::access::{Access, require_access, require_user};
use crate::auth::user::AuthSession;
use crate::entities::{member, user, volunteer};
use crate::error::{AppError, AppResult};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct NewVolunteer {
    pub name: Option<String>,
    pub member_id: Option<String>,
    pub role_title: Option<String>,
    pub contact: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VolunteerPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub member_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub role_title: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub contact: Option<Option<String>>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/activities/{id}/volunteers",
            get(list_volunteers).post(post_volunteer),
        )
        .route(
            "/volunteers/{id}",
            patch(patch_volunteer).delete(delete_volunteer),
        )
}

async fn volunteer_access<C: ConnectionTrait>(
    db: &C,
    user: &user::Model,
    activity_id: &str,
    at_least: Access,
) -> AppResult<()> {
    let activity = find_activity(db, activity_id).await?;
    require_feature(&activity, Feature::Volunteers)?;
    require_access(db, user, activity_id, at_least).await?;
    Ok(())
}

async fn find_volunteer<C: ConnectionTrait>(db: &C, id: &str) -> AppResult<volunteer::Model> {
    volunteer::Entity::find_by_id(id.to_string())
        .one(db)
        .await?
        .ok_or(AppError::NotFound("Volunteer"))
}

/// A linked member lends the volunteer a name when none is given.
async fn volunteer_name<C: ConnectionTrait>(
    db: &C,
    name: Option<String>,
    member_id: Option<&str>,
) -> AppResult<String> {
    if let Some(name) = optional(name) {
        return Ok(name);
    }
    let Some(member_id) = member_id else {
        return Err(AppError::bad_request("Name or member is required"));
    };
    let linked = member::Entity::find_by_id(member_id.to_string())
        .one(db)
        .await?
        .ok_or(AppError::NotFound("Member"))?;
    Ok(linked.full_name())
}

pub async fn list_volunteers(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<volunteer::Model>>> {
    let user = require_user(&auth_session)?;
    volunteer_access(&state.db, &user, &id, Access::Participant).await?;

    let volunteers = volunteer::Entity::find()
        .filter(volunteer::Column::ActivityId.eq(&id))
        .order_by_asc(volunteer::Column::Name)
        .all(&state.db)
        .await?;
    Ok(Json(volunteers))
}

pub async fn post_volunteer(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
    Json(body): Json<NewVolunteer>,
) -> AppResult<impl IntoResponse> {
    let user = require_user(&auth_session)?;
    volunteer_access(&state.db, &user, &id, Access::Leader).await?;

    let member_id = optional(body.member_id);
    let name = volunteer_name(&state.db, body.name, member_id.as_deref()).await?;
    let created = volunteer::ActiveModel {
        id: Set(new_id()),
        activity_id: Set(id),
        member_id: Set(member_id),
        name: Set(name),
        role_title: Set(optional(body.role_title)),
        contact: Set(optional(body.contact)),
    }
    .insert(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn patch_volunteer(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
    Json(patch): Json<VolunteerPatch>,
) -> AppResult<Json<volunteer::Model>> {
    let user = require_user(&auth_session)?;
    let existing = find_volunteer(&state.db, &id).await?;
    volunteer_access(&state.db, &user, &existing.activity_id, Access::Leader).await?;

    let mut model = existing.into_active_model();
    if let Some(name) = patch.name {
        model.name = Set(required("Name", &name)?);
    }
    if let Some(member_id) = patch.member_id {
        model.member_id = Set(optional(member_id));
    }
    if let Some(role_title) = patch.role_title {
        model.role_title = Set(optional(role_title));
    }
    if let Some(contact) = patch.contact {
        model.contact = Set(optional(contact));
    }
    Ok(Json(model.update(&state.db).await?))
}

pub async fn delete_volunteer(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let user = require_user(&auth_session)?;
    let existing = find_volunteer(&state.db, &id).await?;
    volunteer_access(&state.db, &user, &existing.activity_id, Access::Leader).await?;

    volunteer::Entity::delete_by_id(existing.id)
        .exec(&state.db)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn test_volunteer_name_falls_back_to_member() {
        let db = testing::memory_db().await;
        let member = testing::insert_member(&db, "Tone", "Haug").await;

        let name = volunteer_name(&db, Some(" Kiosk ".into()), None).await.unwrap();
        assert_eq!(name, "Kiosk");
        let name = volunteer_name(&db, None, Some(&member.id)).await.unwrap();
        assert_eq!(name, "Tone Haug");
        assert!(volunteer_name(&db, Some("  ".into()), None).await.is_err());
    }
}

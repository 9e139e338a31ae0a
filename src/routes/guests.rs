use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, patch},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Feature, find_activity, new_id, nullable, optional, required, require_feature};
use crate::auth::access::{Access, require_access, require_user};
use crate::auth::user::AuthSession;
use crate::entities::{guest, guest_child, user};
use crate::error::{AppError, AppResult};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct NewGuest {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GuestPatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub note: Option<Option<String>>,
    pub checked_in: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct NewGuestChild {
    pub name: String,
    pub age: Option<i32>,
    pub note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GuestView {
    #[serde(flatten)]
    pub guest: guest::Model,
    pub children: Vec<guest_child::Model>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/activities/{id}/guests",
            get(list_guests).post(post_guest),
        )
        .route("/guests/{id}", patch(patch_guest).delete(delete_guest))
        .route(
            "/guests/{id}/children",
            get(list_children).post(post_child),
        )
        .route("/guest-children/{id}", delete(delete_child))
}

/// Guest lists are managed by the activity's leaders.
async fn guest_list_access<C: ConnectionTrait>(
    db: &C,
    user: &user::Model,
    activity_id: &str,
) -> AppResult<()> {
    let activity = find_activity(db, activity_id).await?;
    require_feature(&activity, Feature::Guests)?;
    require_access(db, user, activity_id, Access::Leader).await?;
    Ok(())
}

async fn find_guest<C: ConnectionTrait>(db: &C, id: &str) -> AppResult<guest::Model> {
    guest::Entity::find_by_id(id.to_string())
        .one(db)
        .await?
        .ok_or(AppError::NotFound("Guest"))
}

/// Children go first so none are left pointing at a missing guest.
pub async fn remove_guest<C: ConnectionTrait>(db: &C, guest_id: &str) -> AppResult<u64> {
    let children = guest_child::Entity::delete_many()
        .filter(guest_child::Column::GuestId.eq(guest_id))
        .exec(db)
        .await?;
    guest::Entity::delete_by_id(guest_id.to_string())
        .exec(db)
        .await?;
    debug!(
        "Deleted guest {guest_id} and {} children",
        children.rows_affected
    );
    Ok(children.rows_affected)
}

pub async fn list_guests(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<GuestView>>> {
    let user = require_user(&auth_session)?;
    guest_list_access(&state.db, &user, &id).await?;

    let guests = guest::Entity::find()
        .filter(guest::Column::ActivityId.eq(&id))
        .order_by_asc(guest::Column::Name)
        .find_with_related(guest_child::Entity)
        .all(&state.db)
        .await?;

    Ok(Json(
        guests
            .into_iter()
            .map(|(guest, children)| GuestView { guest, children })
            .collect(),
    ))
}

pub async fn post_guest(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
    Json(body): Json<NewGuest>,
) -> AppResult<impl IntoResponse> {
    let user = require_user(&auth_session)?;
    guest_list_access(&state.db, &user, &id).await?;

    let created = guest::ActiveModel {
        id: Set(new_id()),
        activity_id: Set(id),
        name: Set(required("Name", &body.name)?),
        email: Set(optional(body.email)),
        phone: Set(optional(body.phone)),
        note: Set(optional(body.note)),
        checked_in: Set(false),
    }
    .insert(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn patch_guest(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
    Json(patch): Json<GuestPatch>,
) -> AppResult<Json<guest::Model>> {
    let user = require_user(&auth_session)?;
    let existing = find_guest(&state.db, &id).await?;
    guest_list_access(&state.db, &user, &existing.activity_id).await?;

    let mut model = existing.into_active_model();
    if let Some(name) = patch.name {
        model.name = Set(required("Name", &name)?);
    }
    if let Some(email) = patch.email {
        model.email = Set(optional(email));
    }
    if let Some(phone) = patch.phone {
        model.phone = Set(optional(phone));
    }
    if let Some(note) = patch.note {
        model.note = Set(optional(note));
    }
    if let Some(checked_in) = patch.checked_in {
        model.checked_in = Set(checked_in);
    }
    Ok(Json(model.update(&state.db).await?))
}

pub async fn delete_guest(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let user = require_user(&auth_session)?;
    let existing = find_guest(&state.db, &id).await?;
    guest_list_access(&state.db, &user, &existing.activity_id).await?;

    remove_guest(&state.db, &existing.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_children(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<guest_child::Model>>> {
    let user = require_user(&auth_session)?;
    let parent = find_guest(&state.db, &id).await?;
    guest_list_access(&state.db, &user, &parent.activity_id).await?;

    let children = guest_child::Entity::find()
        .filter(guest_child::Column::GuestId.eq(&parent.id))
        .order_by_asc(guest_child::Column::Name)
        .all(&state.db)
        .await?;
    Ok(Json(children))
}

pub async fn post_child(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
    Json(body): Json<NewGuestChild>,
) -> AppResult<impl IntoResponse> {
    let user = require_user(&auth_session)?;
    let parent = find_guest(&state.db, &id).await?;
    guest_list_access(&state.db, &user, &parent.activity_id).await?;
    if body.age.is_some_and(|age| !(0..=17).contains(&age)) {
        return Err(AppError::bad_request("A child's age must be between 0 and 17"));
    }

    let created = guest_child::ActiveModel {
        id: Set(new_id()),
        guest_id: Set(parent.id),
        activity_id: Set(parent.activity_id),
        name: Set(required("Name", &body.name)?),
        age: Set(body.age),
        note: Set(optional(body.note)),
    }
    .insert(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_child(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let user = require_user(&auth_session)?;
    let child = guest_child::Entity::find_by_id(id)
        .one(&state.db)
        .await?
        .ok_or(AppError::NotFound("Guest child"))?;
    guest_list_access(&state.db, &user, &child.activity_id).await?;

    guest_child::Entity::delete_by_id(child.id)
        .exec(&state.db)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use sea_orm::PaginatorTrait;

    #[tokio::test]
    async fn test_removing_a_guest_removes_its_children() {
        let db = testing::memory_db().await;
        let activity = testing::insert_activity(&db, "Sommerfest").await;
        let kept = testing::insert_guest(&db, &activity.id, "Kari").await;
        let removed = testing::insert_guest(&db, &activity.id, "Ola").await;
        testing::insert_guest_child(&db, &kept, "Emma").await;
        testing::insert_guest_child(&db, &removed, "Jonas").await;
        testing::insert_guest_child(&db, &removed, "Lea").await;

        assert_eq!(remove_guest(&db, &removed.id).await.unwrap(), 2);

        assert_eq!(guest::Entity::find().count(&db).await.unwrap(), 1);
        let left = guest_child::Entity::find().all(&db).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].guest_id, kept.id);
    }

    #[tokio::test]
    async fn test_guest_list_needs_the_feature() {
        let db = testing::memory_db().await;
        let admin =
            testing::insert_user(&db, "admin@example.org", user::UserRole::Admin, None).await;
        let activity = testing::insert_activity(&db, "Styremøte").await;
        let mut model = activity.clone().into_active_model();
        model.has_guests = Set(false);
        model.update(&db).await.unwrap();

        let err = guest_list_access(&db, &admin, &activity.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }
}

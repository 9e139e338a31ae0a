use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{find_activity, new_id};
use crate::auth::access::{Access, require_access, require_user};
use crate::auth::user::AuthSession;
use crate::entities::enrollment::{self, EnrollmentRole};
use crate::entities::{activity, member};
use crate::error::{AppError, AppResult};
use crate::mirror::{Mirror, PermissionEntry};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct EnrollmentRequest {
    pub member_id: String,
    #[serde(default = "default_role")]
    pub role: EnrollmentRole,
}

fn default_role() -> EnrollmentRole {
    EnrollmentRole::Participant
}

#[derive(Debug, Serialize)]
pub struct EnrollmentView {
    #[serde(flatten)]
    pub enrollment: enrollment::Model,
    pub member_name: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/activities/{id}/enrollments",
            get(list_enrollments).put(put_enrollment),
        )
        .route(
            "/activities/{id}/enrollments/{member_id}",
            delete(delete_enrollment),
        )
}

async fn participant_count<C: ConnectionTrait>(db: &C, activity_id: &str) -> AppResult<u64> {
    Ok(enrollment::Entity::find()
        .filter(enrollment::Column::ActivityId.eq(activity_id))
        .filter(enrollment::Column::Role.eq(EnrollmentRole::Participant))
        .count(db)
        .await?)
}

/// Keeps one row per (member, activity). Returns the row and whether it was
/// created. Only someone becoming a participant is checked against capacity.
pub async fn upsert_enrollment<C: ConnectionTrait>(
    db: &C,
    mirror: &Mirror,
    activity: &activity::Model,
    member_id: &str,
    role: EnrollmentRole,
) -> AppResult<(enrollment::Model, bool)> {
    member::Entity::find_by_id(member_id.to_string())
        .one(db)
        .await?
        .ok_or(AppError::NotFound("Member"))?;

    let existing = enrollment::Entity::find()
        .filter(enrollment::Column::MemberId.eq(member_id))
        .filter(enrollment::Column::ActivityId.eq(&activity.id))
        .one(db)
        .await?;

    let becomes_participant = role == EnrollmentRole::Participant
        && existing
            .as_ref()
            .is_none_or(|e| e.role != EnrollmentRole::Participant);
    if becomes_participant {
        if let Some(capacity) = activity.capacity {
            if participant_count(db, &activity.id).await? >= capacity.max(0) as u64 {
                return Err(AppError::conflict(format!("{} is full", activity.name)));
            }
        }
    }

    let (saved, created) = match existing {
        Some(existing) if existing.role == role => (existing, false),
        Some(existing) => {
            let mut model = existing.into_active_model();
            model.role = Set(role);
            (model.update(db).await?, false)
        }
        None => {
            let model = enrollment::ActiveModel {
                id: Set(new_id()),
                member_id: Set(member_id.to_string()),
                activity_id: Set(activity.id.clone()),
                role: Set(role),
            };
            (model.insert(db).await?, true)
        }
    };

    mirror.upsert_permission(PermissionEntry {
        member_id: saved.member_id.clone(),
        activity_id: saved.activity_id.clone(),
        role: saved.role,
    });
    debug!(
        "Enrollment {} is now {:?} (created: {created})",
        saved.id, saved.role
    );

    Ok((saved, created))
}

pub async fn remove_enrollment<C: ConnectionTrait>(
    db: &C,
    mirror: &Mirror,
    activity_id: &str,
    member_id: &str,
) -> AppResult<()> {
    let result = enrollment::Entity::delete_many()
        .filter(enrollment::Column::ActivityId.eq(activity_id))
        .filter(enrollment::Column::MemberId.eq(member_id))
        .exec(db)
        .await?;
    mirror.remove_permission(member_id, activity_id);

    if result.rows_affected == 0 {
        return Err(AppError::NotFound("Enrollment"));
    }
    Ok(())
}

pub async fn list_enrollments(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<EnrollmentView>>> {
    let user = require_user(&auth_session)?;
    find_activity(&state.db, &id).await?;
    require_access(&state.db, &user, &id, Access::Participant).await?;

    let rows = enrollment::Entity::find()
        .filter(enrollment::Column::ActivityId.eq(&id))
        .order_by_asc(enrollment::Column::Role)
        .find_also_related(member::Entity)
        .all(&state.db)
        .await?;

    Ok(Json(
        rows.into_iter()
            .map(|(enrollment, member)| EnrollmentView {
                enrollment,
                member_name: member.map(|m| m.full_name()),
            })
            .collect(),
    ))
}

pub async fn put_enrollment(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
    Json(body): Json<EnrollmentRequest>,
) -> AppResult<impl IntoResponse> {
    let user = require_user(&auth_session)?;
    let activity = find_activity(&state.db, &id).await?;
    let access = require_access(&state.db, &user, &id, Access::Leader).await?;
    if body.role == EnrollmentRole::Leader && access < Access::Admin {
        return Err(AppError::Forbidden);
    }

    let (saved, created) =
        upsert_enrollment(&state.db, &state.mirror, &activity, &body.member_id, body.role).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(saved)))
}

pub async fn delete_enrollment(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path((id, member_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    let user = require_user(&auth_session)?;
    require_access(&state.db, &user, &id, Access::Leader).await?;
    remove_enrollment(&state.db, &state.mirror, &id, &member_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_pair() {
        let db = testing::memory_db().await;
        let mirror = Mirror::in_memory();
        let activity = testing::insert_activity(&db, "Kor").await;
        let member = testing::insert_member(&db, "Siri", "Moe").await;

        let (first, created) =
            upsert_enrollment(&db, &mirror, &activity, &member.id, EnrollmentRole::Participant)
                .await
                .unwrap();
        assert!(created);

        let (second, created) =
            upsert_enrollment(&db, &mirror, &activity, &member.id, EnrollmentRole::Leader)
                .await
                .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.role, EnrollmentRole::Leader);

        let rows = enrollment::Entity::find().count(&db).await.unwrap();
        assert_eq!(rows, 1);

        let permissions = mirror.permissions();
        assert_eq!(permissions.len(), 1);
        assert_eq!(permissions[0].role, EnrollmentRole::Leader);
    }

    #[tokio::test]
    async fn test_capacity_refuses_extra_participants_only() {
        let db = testing::memory_db().await;
        let mirror = Mirror::in_memory();
        let mut model = testing::insert_activity(&db, "Kurs").await.into_active_model();
        model.capacity = Set(Some(1));
        let activity = model.update(&db).await.unwrap();

        let a = testing::insert_member(&db, "Anna", "Ek").await;
        let b = testing::insert_member(&db, "Bo", "Ek").await;
        let c = testing::insert_member(&db, "Cato", "Ek").await;

        upsert_enrollment(&db, &mirror, &activity, &a.id, EnrollmentRole::Participant)
            .await
            .unwrap();
        let err = upsert_enrollment(&db, &mirror, &activity, &b.id, EnrollmentRole::Participant)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        upsert_enrollment(&db, &mirror, &activity, &c.id, EnrollmentRole::Leader)
            .await
            .unwrap();
        // Re-saving an existing participant is not a new seat.
        upsert_enrollment(&db, &mirror, &activity, &a.id, EnrollmentRole::Participant)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_member_and_removal() {
        let db = testing::memory_db().await;
        let mirror = Mirror::in_memory();
        let activity = testing::insert_activity(&db, "Sjakk").await;
        let member = testing::insert_member(&db, "Per", "Vik").await;

        let err = upsert_enrollment(&db, &mirror, &activity, "nope", EnrollmentRole::Participant)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("Member")));

        upsert_enrollment(&db, &mirror, &activity, &member.id, EnrollmentRole::Participant)
            .await
            .unwrap();
        remove_enrollment(&db, &mirror, &activity.id, &member.id)
            .await
            .unwrap();
        assert!(mirror.permissions().is_empty());

        let err = remove_enrollment(&db, &mirror, &activity.id, &member.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}

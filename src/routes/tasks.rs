use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
};
use chrono::NaiveDate;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Set,
};
use serde::Deserialize;

use super::{Feature, find_activity, new_id, nullable, optional, required, require_feature};
use crate::auth::access::{Access, require_access, require_user};
use crate::auth::user::AuthSession;
use crate::entities::{task, user};
use crate::error::{AppError, AppResult};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub assigned_member_id: Option<String>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub assigned_member_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub due_date: Option<Option<NaiveDate>>,
    pub done: Option<bool>,
}

impl TaskPatch {
    fn only_marks_done(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.assigned_member_id.is_none()
            && self.due_date.is_none()
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/activities/{id}/tasks", get(list_tasks).post(post_task))
        .route("/tasks/{id}", patch(patch_task).delete(delete_task))
}

async fn task_access<C: ConnectionTrait>(
    db: &C,
    user: &user::Model,
    activity_id: &str,
    at_least: Access,
) -> AppResult<Access> {
    let activity = find_activity(db, activity_id).await?;
    require_feature(&activity, Feature::Tasks)?;
    require_access(db, user, activity_id, at_least).await
}

async fn find_task<C: ConnectionTrait>(db: &C, id: &str) -> AppResult<task::Model> {
    task::Entity::find_by_id(id.to_string())
        .one(db)
        .await?
        .ok_or(AppError::NotFound("Task"))
}

/// Leaders edit anything; the assignee may only tick the task off.
fn may_edit(access: Access, user: &user::Model, task: &task::Model, patch: &TaskPatch) -> bool {
    if access >= Access::Leader {
        return true;
    }
    let assigned_to_user = task.assigned_member_id.is_some()
        && task.assigned_member_id == user.member_id;
    assigned_to_user && patch.only_marks_done()
}

pub async fn list_tasks(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<task::Model>>> {
    let user = require_user(&auth_session)?;
    task_access(&state.db, &user, &id, Access::Participant).await?;

    let tasks = task::Entity::find()
        .filter(task::Column::ActivityId.eq(&id))
        .order_by_asc(task::Column::Done)
        .order_by_asc(task::Column::DueDate)
        .order_by_asc(task::Column::Title)
        .all(&state.db)
        .await?;
    Ok(Json(tasks))
}

pub async fn post_task(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
    Json(body): Json<NewTask>,
) -> AppResult<impl IntoResponse> {
    let user = require_user(&auth_session)?;
    task_access(&state.db, &user, &id, Access::Leader).await?;

    let created = task::ActiveModel {
        id: Set(new_id()),
        activity_id: Set(id),
        assigned_member_id: Set(optional(body.assigned_member_id)),
        title: Set(required("Title", &body.title)?),
        description: Set(optional(body.description)),
        due_date: Set(body.due_date),
        done: Set(false),
    }
    .insert(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn patch_task(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> AppResult<Json<task::Model>> {
    let user = require_user(&auth_session)?;
    let existing = find_task(&state.db, &id).await?;
    let access = task_access(&state.db, &user, &existing.activity_id, Access::Participant).await?;
    if !may_edit(access, &user, &existing, &patch) {
        return Err(AppError::Forbidden);
    }

    let mut model = existing.into_active_model();
    if let Some(title) = patch.title {
        model.title = Set(required("Title", &title)?);
    }
    if let Some(description) = patch.description {
        model.description = Set(optional(description));
    }
    if let Some(assigned) = patch.assigned_member_id {
        model.assigned_member_id = Set(optional(assigned));
    }
    if let Some(due_date) = patch.due_date {
        model.due_date = Set(due_date);
    }
    if let Some(done) = patch.done {
        model.done = Set(done);
    }
    Ok(Json(model.update(&state.db).await?))
}

pub async fn delete_task(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let user = require_user(&auth_session)?;
    let existing = find_task(&state.db, &id).await?;
    task_access(&state.db, &user, &existing.activity_id, Access::Leader).await?;

    task::Entity::delete_by_id(existing.id)
        .exec(&state.db)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn test_assignee_may_only_mark_done() {
        let db = testing::memory_db().await;
        let activity = testing::insert_activity(&db, "Dugnad").await;
        let member = testing::insert_member(&db, "Geir", "Lund").await;
        let assignee =
            testing::insert_user(&db, "geir@example.org", user::UserRole::Member, Some(&member.id))
                .await;
        let other = testing::insert_user(&db, "x@example.org", user::UserRole::Member, None).await;
        let task = testing::insert_task(&db, &activity.id, Some(&member.id)).await;

        let tick = TaskPatch {
            done: Some(true),
            ..Default::default()
        };
        let rename = TaskPatch {
            title: Some("Noe annet".into()),
            ..Default::default()
        };

        assert!(may_edit(Access::Participant, &assignee, &task, &tick));
        assert!(!may_edit(Access::Participant, &assignee, &task, &rename));
        assert!(!may_edit(Access::Participant, &other, &task, &tick));
        assert!(may_edit(Access::Leader, &other, &task, &rename));
    }
}

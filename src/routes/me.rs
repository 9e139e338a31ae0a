use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use chrono::NaiveDate;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};

use crate::auth::access::require_user;
use crate::auth::user::AuthSession;
use crate::entities::enrollment::{self, EnrollmentRole};
use crate::entities::{activity, member, user};
use crate::error::AppResult;
use crate::mirror::CalendarEntry;
use crate::router::AppState;

#[derive(Debug, Serialize)]
pub struct MyEnrollment {
    pub activity_id: String,
    pub activity_name: Option<String>,
    pub role: EnrollmentRole,
}

#[derive(Debug, Serialize)]
pub struct Me {
    pub user: user::Model,
    pub member: Option<member::Model>,
    pub enrollments: Vec<MyEnrollment>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CalendarQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(me))
        .route("/me/calendar", get(my_calendar))
}

pub async fn me(
    State(state): State<AppState>,
    auth_session: AuthSession,
) -> AppResult<Json<Me>> {
    let user = require_user(&auth_session)?;
    let Some(member_id) = user.member_id.clone() else {
        return Ok(Json(Me {
            user,
            member: None,
            enrollments: Vec::new(),
        }));
    };

    let member = member::Entity::find_by_id(member_id.clone())
        .one(&state.db)
        .await?;
    let enrollments = enrollment::Entity::find()
        .filter(enrollment::Column::MemberId.eq(member_id))
        .find_also_related(activity::Entity)
        .all(&state.db)
        .await?
        .into_iter()
        .map(|(enrollment, activity)| MyEnrollment {
            activity_id: enrollment.activity_id,
            activity_name: activity.map(|a| a.name),
            role: enrollment.role,
        })
        .collect();

    Ok(Json(Me {
        user,
        member,
        enrollments,
    }))
}

fn within(entry: &CalendarEntry, query: &CalendarQuery) -> bool {
    let day = entry.starts_at.date();
    query.from.is_none_or(|from| day >= from) && query.to.is_none_or(|to| day <= to)
}

/// Served from the mirror; the database has no calendar table.
pub async fn my_calendar(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Query(query): Query<CalendarQuery>,
) -> AppResult<Json<Vec<CalendarEntry>>> {
    let user = require_user(&auth_session)?;
    let Some(member_id) = user.member_id.as_deref() else {
        return Ok(Json(Vec::new()));
    };

    let entries = state
        .mirror
        .calendar_for_member(member_id)
        .into_iter()
        .filter(|entry| within(entry, &query))
        .collect();
    Ok(Json(entries))
}

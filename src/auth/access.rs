use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QuerySelect};
use serde::Serialize;

use super::user::AuthSession;
use crate::entities::{enrollment, user};
use crate::error::{AppError, AppResult};

/// What a user may do with one activity, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    None,
    Participant,
    Leader,
    Admin,
}

impl From<enrollment::EnrollmentRole> for Access {
    fn from(role: enrollment::EnrollmentRole) -> Self {
        match role {
            enrollment::EnrollmentRole::Participant => Access::Participant,
            enrollment::EnrollmentRole::Leader => Access::Leader,
        }
    }
}

pub fn require_user(auth_session: &AuthSession) -> AppResult<user::Model> {
    auth_session.user.clone().ok_or(AppError::Unauthorized)
}

pub fn require_admin(auth_session: &AuthSession) -> AppResult<user::Model> {
    let user = require_user(auth_session)?;
    if user.is_admin() {
        Ok(user)
    } else {
        Err(AppError::Forbidden)
    }
}

pub async fn activity_access<C: ConnectionTrait>(
    db: &C,
    user: &user::Model,
    activity_id: &str,
) -> Result<Access, DbErr> {
    if user.is_admin() {
        return Ok(Access::Admin);
    }
    let Some(member_id) = user.member_id.as_deref() else {
        return Ok(Access::None);
    };

    let enrollment = enrollment::Entity::find()
        .filter(enrollment::Column::MemberId.eq(member_id))
        .filter(enrollment::Column::ActivityId.eq(activity_id))
        .one(db)
        .await?;

    Ok(enrollment.map_or(Access::None, |e| Access::from(e.role)))
}

/// Fails with 403 unless the user reaches `at_least` on the activity.
pub async fn require_access<C: ConnectionTrait>(
    db: &C,
    user: &user::Model,
    activity_id: &str,
    at_least: Access,
) -> AppResult<Access> {
    let access = activity_access(db, user, activity_id).await?;
    if access >= at_least {
        Ok(access)
    } else {
        Err(AppError::Forbidden)
    }
}

/// `None` means every activity is visible.
pub async fn visible_activity_ids<C: ConnectionTrait>(
    db: &C,
    user: &user::Model,
) -> Result<Option<Vec<String>>, DbErr> {
    if user.is_admin() {
        return Ok(None);
    }
    let Some(member_id) = user.member_id.as_deref() else {
        return Ok(Some(Vec::new()));
    };

    let ids = enrollment::Entity::find()
        .select_only()
        .column(enrollment::Column::ActivityId)
        .filter(enrollment::Column::MemberId.eq(member_id))
        .into_tuple::<String>()
        .all(db)
        .await?;
    Ok(Some(ids))
}

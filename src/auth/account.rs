//! Account lifecycle: admin-created users, invitations and password resets.

use chrono::{NaiveDateTime, TimeDelta, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, PaginatorTrait,
    QueryFilter, Set,
};
use tracing::{debug, info};

use super::password::{MIN_PASSWORD_LEN, hash_password};
use super::tokens::{generate_token, hash_token};
use super::user::normalize_email;
use crate::entities::{invitation, member, password_reset, user};
use crate::error::{AppError, AppResult};

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn check_email(email: &str) -> AppResult<String> {
    let email = normalize_email(email);
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if valid {
        Ok(email)
    } else {
        Err(AppError::bad_request("A valid email address is required"))
    }
}

/// Checks the length, then hashes on the blocking pool.
async fn check_password(password: &str) -> AppResult<String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Hashing task failed: {e}")))?
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Hashing failed: {e}")))
}

async fn check_member<C: ConnectionTrait>(db: &C, member_id: Option<&str>) -> AppResult<()> {
    if let Some(member_id) = member_id {
        member::Entity::find_by_id(member_id.to_string())
            .one(db)
            .await?
            .ok_or(AppError::NotFound("Member"))?;
    }
    Ok(())
}

async fn check_email_free<C: ConnectionTrait>(db: &C, email: &str) -> AppResult<()> {
    let taken = user::Entity::find()
        .filter(user::Column::Email.eq(email))
        .count(db)
        .await?;
    if taken > 0 {
        return Err(AppError::conflict("A user with this email already exists"));
    }
    Ok(())
}

pub async fn create_user<C: ConnectionTrait>(
    db: &C,
    email: &str,
    password: &str,
    role: user::UserRole,
    member_id: Option<String>,
) -> AppResult<user::Model> {
    let email = check_email(email)?;
    let password_hash = check_password(password).await?;
    check_member(db, member_id.as_deref()).await?;
    check_email_free(db, &email).await?;

    let created = user::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        email: Set(email),
        password_hash: Set(Some(password_hash)),
        role: Set(role),
        member_id: Set(member_id),
    }
    .insert(db)
    .await?;

    info!("Created {:?} user {}", created.role, created.id);
    Ok(created)
}

/// Creates the first admin when nobody can log in yet.
pub async fn ensure_bootstrap_admin<C: ConnectionTrait>(
    db: &C,
    email: &str,
    password: &str,
) -> AppResult<bool> {
    if user::Entity::find().count(db).await? > 0 {
        return Ok(false);
    }
    create_user(db, email, password, user::UserRole::Admin, None).await?;
    Ok(true)
}

/// Returns the invitation and the plain token to hand to the invitee.
pub async fn create_invitation<C: ConnectionTrait>(
    db: &C,
    email: &str,
    role: user::UserRole,
    member_id: Option<String>,
    ttl_hours: i64,
) -> AppResult<(invitation::Model, String)> {
    let email = check_email(email)?;
    check_member(db, member_id.as_deref()).await?;
    check_email_free(db, &email).await?;

    let token = generate_token();
    let created = invitation::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        email: Set(email),
        role: Set(role),
        member_id: Set(member_id),
        token_hash: Set(hash_token(&token)),
        expires_at: Set(now() + TimeDelta::hours(ttl_hours)),
        accepted_at: Set(None),
    }
    .insert(db)
    .await?;

    info!("Invitation {} issued, expires {}", created.id, created.expires_at);
    Ok((created, token))
}

pub async fn accept_invitation<C: ConnectionTrait>(
    db: &C,
    token: &str,
    password: &str,
) -> AppResult<user::Model> {
    let found = invitation::Entity::find()
        .filter(invitation::Column::TokenHash.eq(hash_token(token)))
        .one(db)
        .await?
        .ok_or(AppError::NotFound("Invitation"))?;

    if found.accepted_at.is_some() {
        return Err(AppError::conflict("Invitation has already been used"));
    }
    if found.expires_at < now() {
        return Err(AppError::conflict("Invitation has expired"));
    }

    let created = create_user(
        db,
        &found.email,
        password,
        found.role,
        found.member_id.clone(),
    )
    .await?;

    let mut accepted = found.into_active_model();
    accepted.accepted_at = Set(Some(now()));
    accepted.update(db).await?;

    Ok(created)
}

/// Issues a reset token when the email belongs to a user. Callers must not
/// reveal whether it did.
pub async fn request_password_reset<C: ConnectionTrait>(
    db: &C,
    email: &str,
    ttl_minutes: i64,
) -> AppResult<Option<String>> {
    let found = user::Entity::find()
        .filter(user::Column::Email.eq(normalize_email(email)))
        .one(db)
        .await?;
    let Some(found) = found else {
        debug!("Password reset requested for unknown email");
        return Ok(None);
    };

    let token = generate_token();
    password_reset::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        user_id: Set(found.id.clone()),
        token_hash: Set(hash_token(&token)),
        expires_at: Set(now() + TimeDelta::minutes(ttl_minutes)),
        used_at: Set(None),
    }
    .insert(db)
    .await?;

    info!("Password reset issued for user {}", found.id);
    Ok(Some(token))
}

pub async fn confirm_password_reset<C: ConnectionTrait>(
    db: &C,
    token: &str,
    password: &str,
) -> AppResult<()> {
    let reset = password_reset::Entity::find()
        .filter(password_reset::Column::TokenHash.eq(hash_token(token)))
        .one(db)
        .await?
        .ok_or(AppError::NotFound("Reset token"))?;

    if reset.used_at.is_some() || reset.expires_at < now() {
        return Err(AppError::conflict("Reset token is no longer valid"));
    }
    let password_hash = check_password(password).await?;

    let account = user::Entity::find_by_id(reset.user_id.clone())
        .one(db)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    let mut account = account.into_active_model();
    account.password_hash = Set(Some(password_hash));
    account.update(db).await?;

    let mut reset = reset.into_active_model();
    reset.used_at = Set(Some(now()));
    reset.update(db).await?;

    Ok(())
}

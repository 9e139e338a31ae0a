use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::NaiveDate;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, Set, SqlErr,
};
use serde::Deserialize;
use tracing::{debug, info};

use super::{new_id, nullable, optional, required};
use crate::auth::access::{require_admin, require_user};
use crate::auth::user::{AuthSession, normalize_email};
use crate::entities::{member, user};
use crate::error::{AppError, AppResult};
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct MemberQuery {
    #[serde(default)]
    pub include_archived: bool,
}

/// Full member record as sent by the admin form and the registration sync.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemberInput {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub guardian_name: Option<String>,
    pub guardian_email: Option<String>,
    pub guardian_phone: Option<String>,
    pub medical_notes: Option<String>,
    pub allergies: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MemberPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub birth_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "nullable")]
    pub guardian_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub guardian_email: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub guardian_phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub medical_notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub allergies: Option<Option<String>>,
    pub archived: Option<bool>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/members", get(list_members).post(post_member))
        .route("/members/sync", post(sync_member_handler))
        .route(
            "/members/{id}",
            get(get_member).patch(patch_member).delete(archive_member),
        )
}

fn email(value: Option<String>) -> Option<String> {
    optional(value).map(|e| normalize_email(&e))
}

fn apply_input(model: &mut member::ActiveModel, input: MemberInput) -> AppResult<()> {
    model.first_name = Set(required("First name", &input.first_name)?);
    model.last_name = Set(required("Last name", &input.last_name)?);
    model.email = Set(email(input.email));
    model.phone = Set(optional(input.phone));
    model.address = Set(optional(input.address));
    model.birth_date = Set(input.birth_date);
    model.guardian_name = Set(optional(input.guardian_name));
    model.guardian_email = Set(email(input.guardian_email));
    model.guardian_phone = Set(optional(input.guardian_phone));
    model.medical_notes = Set(optional(input.medical_notes));
    model.allergies = Set(optional(input.allergies));
    Ok(())
}

const EMAIL_TAKEN: &str = "A member with this email already exists";

/// Emails are unique among members. `except` is the member being edited.
async fn check_email_free<C: ConnectionTrait>(
    db: &C,
    address: Option<&str>,
    except: Option<&str>,
) -> AppResult<()> {
    let Some(address) = address else {
        return Ok(());
    };
    let mut query = member::Entity::find().filter(member::Column::Email.eq(address));
    if let Some(id) = except {
        query = query.filter(member::Column::Id.ne(id));
    }
    if query.count(db).await? > 0 {
        return Err(AppError::conflict(EMAIL_TAKEN));
    }
    Ok(())
}

/// A racing writer can still trip the unique index after the check.
fn write_error(err: DbErr) -> AppError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => AppError::conflict(EMAIL_TAKEN),
        _ => err.into(),
    }
}

pub async fn create_member<C: ConnectionTrait>(
    db: &C,
    input: MemberInput,
) -> AppResult<member::Model> {
    let mut model = member::ActiveModel {
        id: Set(new_id()),
        archived: Set(false),
        ..Default::default()
    };
    check_email_free(db, email(input.email.clone()).as_deref(), None).await?;
    apply_input(&mut model, input)?;
    model.insert(db).await.map_err(write_error)
}

/// Upserts on email. A synced member is always active again.
pub async fn sync_member<C: ConnectionTrait>(
    db: &C,
    input: MemberInput,
) -> AppResult<(member::Model, bool)> {
    let Some(address) = email(input.email.clone()) else {
        return Err(AppError::bad_request("Email is required to sync a member"));
    };

    let existing = member::Entity::find()
        .filter(member::Column::Email.eq(&address))
        .one(db)
        .await?;

    match existing {
        Some(existing) => {
            let mut model = existing.into_active_model();
            apply_input(&mut model, input)?;
            model.archived = Set(false);
            let updated = model.update(db).await.map_err(write_error)?;
            debug!("Synced existing member {}", updated.id);
            Ok((updated, false))
        }
        None => {
            let created = create_member(db, input).await?;
            info!("Registered member {}", created.id);
            Ok((created, true))
        }
    }
}

async fn find_member<C: ConnectionTrait>(db: &C, id: &str) -> AppResult<member::Model> {
    member::Entity::find_by_id(id.to_string())
        .one(db)
        .await?
        .ok_or(AppError::NotFound("Member"))
}

pub async fn list_members(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Query(query): Query<MemberQuery>,
) -> AppResult<Json<Vec<member::Model>>> {
    require_admin(&auth_session)?;

    let mut select = member::Entity::find()
        .order_by_asc(member::Column::LastName)
        .order_by_asc(member::Column::FirstName);
    if !query.include_archived {
        select = select.filter(member::Column::Archived.eq(false));
    }
    Ok(Json(select.all(&state.db).await?))
}

pub async fn post_member(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Json(body): Json<MemberInput>,
) -> AppResult<impl IntoResponse> {
    require_admin(&auth_session)?;
    let created = create_member(&state.db, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Admins sync anyone. Members sync their own address and get linked to the
/// resulting record.
pub async fn sync_member_handler(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Json(body): Json<MemberInput>,
) -> AppResult<impl IntoResponse> {
    let caller = require_user(&auth_session)?;
    let own_address = body.email.as_deref().map(normalize_email) == Some(caller.email.clone());
    if !caller.is_admin() && !own_address {
        return Err(AppError::Forbidden);
    }

    let (synced, created) = sync_member(&state.db, body).await?;

    if own_address && caller.member_id.is_none() {
        let mut account = caller.into_active_model();
        account.member_id = Set(Some(synced.id.clone()));
        let linked: user::Model = account.update(&state.db).await?;
        debug!("Linked user {} to member {}", linked.id, synced.id);
    }

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(synced)))
}

pub async fn get_member(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<Json<member::Model>> {
    let caller = require_user(&auth_session)?;
    if !caller.is_admin() && caller.member_id.as_deref() != Some(id.as_str()) {
        return Err(AppError::Forbidden);
    }
    Ok(Json(find_member(&state.db, &id).await?))
}

pub async fn patch_member(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
    Json(patch): Json<MemberPatch>,
) -> AppResult<Json<member::Model>> {
    require_admin(&auth_session)?;
    Ok(Json(update_member(&state.db, &id, patch).await?))
}

pub async fn update_member<C: ConnectionTrait>(
    db: &C,
    id: &str,
    patch: MemberPatch,
) -> AppResult<member::Model> {
    let mut model = find_member(db, id).await?.into_active_model();

    if let Some(first_name) = patch.first_name {
        model.first_name = Set(required("First name", &first_name)?);
    }
    if let Some(last_name) = patch.last_name {
        model.last_name = Set(required("Last name", &last_name)?);
    }
    if let Some(value) = patch.email {
        let address = email(value);
        check_email_free(db, address.as_deref(), Some(id)).await?;
        model.email = Set(address);
    }
    if let Some(value) = patch.phone {
        model.phone = Set(optional(value));
    }
    if let Some(value) = patch.address {
        model.address = Set(optional(value));
    }
    if let Some(value) = patch.birth_date {
        model.birth_date = Set(value);
    }
    if let Some(value) = patch.guardian_name {
        model.guardian_name = Set(optional(value));
    }
    if let Some(value) = patch.guardian_email {
        model.guardian_email = Set(email(value));
    }
    if let Some(value) = patch.guardian_phone {
        model.guardian_phone = Set(optional(value));
    }
    if let Some(value) = patch.medical_notes {
        model.medical_notes = Set(optional(value));
    }
    if let Some(value) = patch.allergies {
        model.allergies = Set(optional(value));
    }
    if let Some(archived) = patch.archived {
        model.archived = Set(archived);
    }

    model.update(db).await.map_err(write_error)
}

pub async fn archive_member(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<Json<member::Model>> {
    require_admin(&auth_session)?;
    let mut model = find_member(&state.db, &id).await?.into_active_model();
    model.archived = Set(true);
    Ok(Json(model.update(&state.db).await?))
}

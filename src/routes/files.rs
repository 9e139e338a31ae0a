use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use tracing::info;

use super::find_activity;
use crate::auth::access::{Access, require_access, require_user};
use crate::auth::user::AuthSession;
use crate::error::{AppError, AppResult};
use crate::router::AppState;
use crate::storage::StoredFile;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub name: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/activities/{id}/files", get(list_files).post(upload_file))
        .route(
            "/activities/{id}/files/{file_id}",
            get(download_file).delete(delete_file),
        )
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

/// RFC 6266 `filename*` so non-ASCII names survive.
fn content_disposition(name: &str) -> String {
    format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(name, NON_ALPHANUMERIC)
    )
}

pub async fn list_files(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<StoredFile>>> {
    let user = require_user(&auth_session)?;
    find_activity(&state.db, &id).await?;
    require_access(&state.db, &user, &id, Access::Participant).await?;

    Ok(Json(state.files.list(&id).await?))
}

pub async fn upload_file(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path(id): Path<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let user = require_user(&auth_session)?;
    find_activity(&state.db, &id).await?;
    require_access(&state.db, &user, &id, Access::Leader).await?;
    if body.is_empty() {
        return Err(AppError::bad_request("The uploaded file is empty"));
    }

    let stored = state
        .files
        .save(&id, &query.name, &content_type(&headers), &body, Some(user.id))
        .await?;
    info!("Uploaded {} to activity {}", stored.id, id);

    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn download_file(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path((id, file_id)): Path<(String, String)>,
) -> AppResult<Response> {
    let user = require_user(&auth_session)?;
    require_access(&state.db, &user, &id, Access::Participant).await?;

    let (file, bytes) = state.files.read(&id, &file_id).await?;
    let mut response = bytes.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&file.content_type)
            .unwrap_or(HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    if let Ok(disposition) = HeaderValue::from_str(&content_disposition(&file.name)) {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }
    Ok(response)
}

pub async fn delete_file(
    State(state): State<AppState>,
    auth_session: AuthSession,
    Path((id, file_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    let user = require_user(&auth_session)?;
    require_access(&state.db, &user, &id, Access::Leader).await?;

    let removed = state.files.delete(&id, &file_id).await?;
    info!("Deleted file {} from activity {}", removed.id, id);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_defaults() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_type(&headers), DEFAULT_CONTENT_TYPE);
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
        assert_eq!(content_type(&headers), "application/pdf");
    }

    #[test]
    fn test_content_disposition_encodes_name() {
        assert_eq!(
            content_disposition("Årsplan 2024.pdf"),
            "attachment; filename*=UTF-8''%C3%85rsplan%202024%2Epdf"
        );
    }
}

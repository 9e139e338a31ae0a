use axum::{
    Form, Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::account;
use super::user::{AuthSession, Credentials};
use crate::error::{AppError, AppResult};
use crate::router::AppState;

// This allows us to extract the "next" field from the query string. We use this
// to redirect after log in.
#[derive(Debug, Deserialize)]
pub struct NextUrl {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    email: String,
}

#[derive(Deserialize)]
pub struct TokenWithPassword {
    token: String,
    password: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(self::post::login))
        .route("/login", get(self::get::login))
        .route("/logout", get(self::get::logout))
        .route("/auth/invitations/accept", post(self::post::accept_invitation))
        .route("/auth/password-reset", post(self::post::request_password_reset))
        .route(
            "/auth/password-reset/confirm",
            post(self::post::confirm_password_reset),
        )
}

/// Only same-site paths are followed after login.
fn safe_next(next: Option<String>) -> String {
    match next {
        Some(next) if next.starts_with('/') && !next.starts_with("//") => next,
        _ => "/dashboard".to_string(),
    }
}

fn render_login(state: &AppState, next: Option<&str>, error: Option<&str>) -> AppResult<Html<String>> {
    state.render("login.html", minijinja::context! { next => next, error => error })
}

mod post {
    use super::*;

    pub async fn login(
        State(state): State<AppState>,
        mut auth_session: AuthSession,
        Form(creds): Form<Credentials>,
    ) -> AppResult<Response> {
        let next = creds.next.clone();
        let user = match auth_session.authenticate(creds).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                let page = render_login(&state, next.as_deref(), Some("Feil e-post eller passord"))?;
                return Ok((StatusCode::UNAUTHORIZED, page).into_response());
            }
            Err(e) => return Err(AppError::Internal(anyhow::anyhow!("Login failed: {e}"))),
        };

        auth_session
            .login(&user)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Session write failed: {e}")))?;
        debug!("User {} logged in", user.id);

        Ok(Redirect::to(&safe_next(next)).into_response())
    }

    pub async fn accept_invitation(
        State(state): State<AppState>,
        Json(body): Json<TokenWithPassword>,
    ) -> AppResult<impl IntoResponse> {
        let user = account::accept_invitation(&state.db, &body.token, &body.password).await?;
        Ok((StatusCode::CREATED, Json(user)))
    }

    pub async fn request_password_reset(
        State(state): State<AppState>,
        Json(body): Json<ResetRequest>,
    ) -> AppResult<impl IntoResponse> {
        let ttl = state.config.reset_token_ttl_minutes;
        if let Some(token) = account::request_password_reset(&state.db, &body.email, ttl).await? {
            // Mail delivery is handled outside this service; the link is
            // only exposed to operators through the logs.
            info!("Password reset link: /reset-password?token={token}");
        }
        Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "status": "If the address is registered, a reset link is on its way" })),
        ))
    }

    pub async fn confirm_password_reset(
        State(state): State<AppState>,
        Json(body): Json<TokenWithPassword>,
    ) -> AppResult<impl IntoResponse> {
        account::confirm_password_reset(&state.db, &body.token, &body.password).await?;
        Ok(Json(json!({ "status": "Password updated" })))
    }
}

mod get {
    use super::*;

    pub async fn login(
        State(state): State<AppState>,
        Query(NextUrl { next }): Query<NextUrl>,
    ) -> AppResult<Html<String>> {
        render_login(&state, next.as_deref(), None)
    }

    pub async fn logout(mut auth_session: AuthSession) -> impl IntoResponse {
        match auth_session.logout().await {
            Ok(_) => Redirect::to("/login").into_response(),
            Err(e) => {
                warn!("Logout failed: {e}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

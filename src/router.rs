use crate::{
    auth::{
        router as auth_router,
        user::{AuthSession, Backend},
    },
    config::Config,
    error::{AppError, AppResult},
    mirror::Mirror,
    routes::{self, dashboard},
    storage::FileStorage,
    util::asset_loader::AssetLoader,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    response::{Html, IntoResponse, Redirect},
    routing::{get, get_service},
};
use axum_login::{
    AuthManagerLayerBuilder, login_required,
    tower_sessions::{
        Expiry, SessionManagerLayer, SessionStore,
        cookie::{SameSite, time},
    },
};
use minijinja::Environment;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tokio::{signal, task::AbortHandle};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub mirror: Mirror,
    pub files: FileStorage,
    pub templates: Arc<Environment<'static>>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn render<S: Serialize>(&self, name: &str, ctx: S) -> AppResult<Html<String>> {
        let tmpl = self
            .templates
            .get_template(name)
            .map_err(anyhow::Error::from)?;
        let html = tmpl.render(ctx).map_err(anyhow::Error::from)?;
        Ok(Html(html))
    }
}

pub fn create_router<S>(state: AppState, session_store: S) -> Router
where
    S: SessionStore + Clone,
{
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(state.config.session_secure)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::days(1)));

    // Auth service.
    //
    // This combines the session layer with our backend to establish the auth
    // service which will provide the auth session as a request extension.
    let backend = Backend::new(state.db.clone());
    let auth_layer = AuthManagerLayerBuilder::new(backend, session_layer).build();

    let max_upload_bytes = state.config.max_upload_bytes;

    // Pages bounce anonymous visitors to the login form; the JSON API answers
    // 401 from the handlers instead.
    let pages = Router::new()
        .route("/dashboard", get(dashboard::dashboard))
        .route("/admin/cleanup", get(dashboard::cleanup))
        .route_layer(login_required!(Backend, login_url = "/login"));

    Router::new()
        .merge(pages)
        .route("/", get(index))
        .nest("/api", routes::api())
        .merge(auth_router::router())
        .fallback(not_found)
        .with_state(state)
        .nest_service("/static", get_service(ServeDir::new("static")))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(auth_layer)
}

pub fn setup_templates() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_loader(minijinja::path_loader("templates"));
    AssetLoader::new("static").register(&mut env);
    env
}

async fn index(auth_session: AuthSession) -> impl IntoResponse {
    if auth_session.user.is_some() {
        Redirect::to("/dashboard")
    } else {
        Redirect::to("/login")
    }
}

async fn not_found() -> AppError {
    AppError::NotFound("Route")
}

pub async fn shutdown_signal(deletion_task_abort_handle: AbortHandle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { deletion_task_abort_handle.abort() },
        _ = terminate => { deletion_task_abort_handle.abort() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::user::UserRole;
    use crate::testing;
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use axum_login::tower_sessions::MemoryStore;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn app() -> (Router, AppState) {
        let state = testing::app_state().await;
        (create_router(state.clone(), MemoryStore::default()), state)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn login(app: &Router, email: &str) -> String {
        let response = app
            .clone()
            .oneshot(
                Request::post("/login")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(format!("email={email}&password=hemmelig123")))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_anonymous_api_gets_json_401() {
        let (app, _) = app().await;
        let response = app
            .oneshot(Request::get("/api/activities").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "Not signed in");
    }

    #[tokio::test]
    async fn test_pages_redirect_to_login() {
        let (app, _) = app().await;
        let response = app
            .oneshot(Request::get("/dashboard").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(response.status().is_redirection());
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        assert!(location.starts_with("/login"));
    }

    #[tokio::test]
    async fn test_login_page_renders() {
        let (app, _) = app().await;
        let response = app
            .oneshot(Request::get("/login").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let (app, state) = app().await;
        testing::insert_user(&state.db, "ansatt@example.org", UserRole::Member, None).await;

        let response = app
            .oneshot(
                Request::post("/login")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("email=ansatt@example.org&password=feil"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_creates_and_hard_deletes_activity() {
        let (app, state) = app().await;
        testing::insert_user(&state.db, "admin@example.org", UserRole::Admin, None).await;
        let cookie = login(&app, "admin@example.org").await;

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/activities")
                    .header(header::COOKIE, &cookie)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"name":"Julebord","kind":"event","has_guests":true}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = body_json(response).await["id"].as_str().unwrap().to_string();
        assert_eq!(state.mirror.activities().len(), 1);

        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/api/admin/activities/{id}"))
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["root_removed"], true);
        assert!(state.mirror.activities().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_feature_answers_409() {
        let (app, state) = app().await;
        testing::insert_user(&state.db, "admin@example.org", UserRole::Admin, None).await;
        let cookie = login(&app, "admin@example.org").await;

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/activities")
                    .header(header::COOKIE, &cookie)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"name":"Møte","kind":"offer"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let id = body_json(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(
                Request::get(format!("/api/activities/{id}/guests"))
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_member_cannot_reach_admin_api() {
        let (app, state) = app().await;
        testing::insert_user(&state.db, "ansatt@example.org", UserRole::Member, None).await;
        let cookie = login(&app, "ansatt@example.org").await;

        let response = app
            .oneshot(
                Request::get("/api/admin/reconcile")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}

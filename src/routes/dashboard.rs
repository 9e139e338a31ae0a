use axum::{extract::State, response::Html};
use chrono::Utc;

use crate::{
    auth::{
        access::{require_admin, require_user},
        user::AuthSession,
    },
    error::AppResult,
    reconcile,
    router::AppState,
    routes::activities::{ActivityQuery, list_visible},
};

const UPCOMING_LIMIT: usize = 10;

pub async fn dashboard(
    State(state): State<AppState>,
    auth_session: AuthSession,
) -> AppResult<Html<String>> {
    let user = require_user(&auth_session)?;
    let now = Utc::now().naive_utc();

    let query = ActivityQuery {
        include_archived: false,
        kind: None,
    };
    let activities = list_visible(&state, &user, &query).await?;

    // Upcoming sessions for the signed-in member, straight from the mirror.
    let upcoming: Vec<_> = match user.member_id.as_deref() {
        Some(member_id) => state
            .mirror
            .calendar_for_member(member_id)
            .into_iter()
            .filter(|entry| entry.ends_at >= now)
            .take(UPCOMING_LIMIT)
            .collect(),
        None => Vec::new(),
    };

    let is_admin = user.is_admin();
    state.render(
        "dashboard.html",
        minijinja::context! {
            email => user.email,
            is_admin => is_admin,
            activities => activities,
            upcoming => upcoming,
        },
    )
}

/// Ghost report for administrators, with a button that posts to the purge
/// endpoint.
pub async fn cleanup(
    State(state): State<AppState>,
    auth_session: AuthSession,
) -> AppResult<Html<String>> {
    let user = require_admin(&auth_session)?;
    let report = reconcile::scan(&state.db, &state.mirror).await?;
    let is_clean = report.is_clean();

    state.render(
        "cleanup.html",
        minijinja::context! {
            email => user.email,
            is_clean => is_clean,
            report => report,
        },
    )
}

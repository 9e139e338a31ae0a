mod auth;
mod config;
mod database;
mod entities;
mod error;
mod mirror;
mod reconcile;
mod router;
mod routes;
mod storage;
#[cfg(test)]
mod testing;
mod util;

use std::sync::Arc;

use anyhow::Context;
use axum_login::tower_sessions::ExpiredDeletion;
use tokio::net::TcpListener;
use tower_sessions_sqlx_store::PostgresStore;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    auth::account::ensure_bootstrap_admin,
    config::Config,
    database::setup_database,
    mirror::{Mirror, store::FileStore},
    router::{AppState, create_router, setup_templates, shutdown_signal},
    storage::FileStorage,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (db, pool) = setup_database(&config.database_url).await?;

    let session_store = PostgresStore::new(pool);
    session_store.migrate().await?;

    let deletion_task = tokio::task::spawn(
        session_store
            .clone()
            .continuously_delete_expired(tokio::time::Duration::from_secs(60)),
    );

    let mirror_store = FileStore::open(&config.mirror_dir)
        .with_context(|| format!("Cannot open mirror at {}", config.mirror_dir.display()))?;
    let mirror = Mirror::new(mirror_store);
    let migrated = mirror.migrate_legacy();
    if migrated > 0 {
        info!("Moved {migrated} legacy mirror records to versioned keys");
    }

    let files = FileStorage::open(&config.files_dir)
        .await
        .with_context(|| format!("Cannot open files dir {}", config.files_dir.display()))?;

    if let Some((email, password)) = &config.bootstrap_admin {
        match ensure_bootstrap_admin(&db, email, password).await {
            Ok(true) => info!("Created bootstrap admin {email}"),
            Ok(false) => {}
            Err(e) => warn!("Bootstrap admin not created: {e}"),
        }
    }

    let bind_addr = config.bind_addr.clone();
    let state = AppState {
        db,
        mirror,
        files,
        templates: Arc::new(setup_templates()),
        config: Arc::new(config),
    };
    let app = create_router(state, session_store);

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Listening on {bind_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(deletion_task.abort_handle()))
        .await?;

    match deletion_task.await {
        Ok(result) => result?,
        Err(e) if e.is_cancelled() => {}
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use anyhow::Context;
use tracing::info;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub rust_log: String,
    pub bind_addr: String,
    pub mirror_dir: PathBuf,
    pub files_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub session_secure: bool,
    pub reset_token_ttl_minutes: i64,
    pub invitation_ttl_hours: i64,
    pub bootstrap_admin: Option<(String, String)>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // Containers inject the environment directly, so .env is optional.
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "debug".into());

        let bootstrap_admin = match (
            env::var("BOOTSTRAP_ADMIN_EMAIL"),
            env::var("BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Ok(email), Ok(password)) => Some((email, password)),
            _ => None,
        };

        Ok(Self {
            database_url,
            rust_log,
            bind_addr: try_load("BIND_ADDR", "0.0.0.0:3000")?,
            mirror_dir: try_load("MIRROR_DIR", "data/mirror")?,
            files_dir: try_load("FILES_DIR", "data/files")?,
            max_upload_bytes: try_load("MAX_UPLOAD_BYTES", "20971520")?,
            session_secure: try_load("SESSION_SECURE", "false")?,
            reset_token_ttl_minutes: try_load("RESET_TOKEN_TTL_MINUTES", "60")?,
            invitation_ttl_hours: try_load("INVITATION_TTL_HOURS", "72")?,
            bootstrap_admin,
        })
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse()
        .map_err(|e| anyhow::anyhow!("Invalid {key} value {raw:?}: {e}"))
}

use async_session::async_trait;
use axum_login::{AuthUser, AuthnBackend, UserId};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Deserialize;
use tracing::debug;

use super::password::verify_password;
use crate::entities::user;

impl AuthUser for user::Model {
    type Id = String;

    fn id(&self) -> Self::Id {
        self.id.clone()
    }

    // Changing the password invalidates existing sessions.
    fn session_auth_hash(&self) -> &[u8] {
        self.password_hash.as_deref().unwrap_or_default().as_bytes()
    }
}

#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub next: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[redacted]")
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Seaorm(sea_orm::DbErr),

    #[error(transparent)]
    TaskJoin(tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct Backend {
    db: DatabaseConnection,
}

impl Backend {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
impl AuthnBackend for Backend {
    type User = user::Model;
    type Credentials = Credentials;
    type Error = BackendError;

    async fn authenticate(
        &self,
        creds: Self::Credentials,
    ) -> Result<Option<Self::User>, Self::Error> {
        let found = user::Entity::find()
            .filter(user::Column::Email.eq(normalize_email(&creds.email)))
            .one(&self.db)
            .await
            .map_err(Self::Error::Seaorm)?;

        let Some(found) = found else {
            debug!("Login attempt for unknown email");
            return Ok(None);
        };
        // Invited users have no password until they accept.
        let Some(hash) = found.password_hash.clone() else {
            return Ok(None);
        };

        // Argon2 is deliberately slow; keep it off the async workers.
        let matches = tokio::task::spawn_blocking(move || verify_password(&creds.password, &hash))
            .await
            .map_err(Self::Error::TaskJoin)?;

        Ok(matches.then_some(found))
    }

    async fn get_user(&self, user_id: &UserId<Self>) -> Result<Option<Self::User>, Self::Error> {
        user::Entity::find_by_id(user_id.clone())
            .one(&self.db)
            .await
            .map_err(Self::Error::Seaorm)
    }
}

pub type AuthSession = axum_login::AuthSession<Backend>;

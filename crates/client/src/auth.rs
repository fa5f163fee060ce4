use std::sync::Arc;

use chrono::{DateTime, Utc};
use resq_core::config::BackendConfig;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
pub struct AuthSession {
    pub user_id: String,
    pub access_token: SecretString,
    /// `None` means the token does not expire.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthSession {
    pub fn new(
        user_id: impl Into<String>,
        access_token: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: SecretString::from(access_token.into()),
            expires_at,
        }
    }

    /// Builds a session from the configured user id and access token.
    pub fn from_config(backend: &BackendConfig) -> Option<Self> {
        let user_id = backend.user_id.as_deref().map(str::trim).filter(|id| !id.is_empty())?;
        let token = backend.access_token.as_ref()?;
        if token.expose_secret().trim().is_empty() {
            return None;
        }
        Some(Self { user_id: user_id.to_string(), access_token: token.clone(), expires_at: None })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Shared holder for the signed-in session.
#[derive(Clone, Debug, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<Option<AuthSession>>>,
}

impl SessionStore {
    pub fn new(session: Option<AuthSession>) -> Self {
        Self { inner: Arc::new(RwLock::new(session)) }
    }

    pub async fn sign_in(&self, session: AuthSession) {
        *self.inner.write().await = Some(session);
    }

    pub async fn sign_out(&self) {
        *self.inner.write().await = None;
    }

    /// The session if one exists and has not expired.
    pub async fn current(&self) -> Option<AuthSession> {
        self.active_at(Utc::now()).await
    }

    pub async fn active_at(&self, now: DateTime<Utc>) -> Option<AuthSession> {
        self.inner.read().await.as_ref().filter(|session| !session.is_expired_at(now)).cloned()
    }
}

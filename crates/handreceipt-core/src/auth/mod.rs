//! Bearer token capability used by the sync engine.

use std::fmt;
use std::future::Future;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::api::parse_api_error;
use crate::util::normalize_text_option;

const EXPIRY_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub user: AuthUser,
}

impl AuthSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= unix_timestamp_now() + EXPIRY_SKEW_SECONDS
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No auth session is available; sign in first.")]
    NotConfigured,
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Auth API error: {0}")]
    Api(String),
    #[error("Secure storage error: {0}")]
    SecureStorage(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Supplies and refreshes the bearer token sent with every API call.
pub trait TokenSource: Send + Sync {
    /// Current access token, refreshing first when it is known to be stale.
    fn access_token(&self) -> impl Future<Output = AuthResult<String>> + Send;

    /// Force a refresh after the server answered `401`.
    fn refresh(&self) -> impl Future<Output = AuthResult<String>> + Send;
}

pub trait SessionPersistence: Clone + Send + Sync + 'static {
    fn load_session(&self) -> AuthResult<Option<AuthSession>>;
    fn save_session(&self, session: &AuthSession) -> AuthResult<()>;
    fn clear_session(&self) -> AuthResult<()>;
}

/// A fixed token, e.g. from `HANDRECEIPT_ACCESS_TOKEN`. It cannot be refreshed.
#[derive(Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> AuthResult<Self> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Access token must not be empty",
            ));
        }
        Ok(Self { token })
    }
}

impl fmt::Debug for StaticTokenSource {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("StaticTokenSource")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> AuthResult<String> {
        Ok(self.token.clone())
    }

    async fn refresh(&self) -> AuthResult<String> {
        Err(AuthError::Api(
            "a static access token cannot be refreshed".to_string(),
        ))
    }
}

/// Session-backed token source refreshing through `{auth_url}/token`.
pub struct RefreshingTokenSource<S: SessionPersistence> {
    auth_url: String,
    api_key: Option<String>,
    client: Client,
    store: S,
    session: Mutex<Option<AuthSession>>,
}

impl<S: SessionPersistence> RefreshingTokenSource<S> {
    pub fn new(auth_url: &str, api_key: Option<String>, store: S) -> AuthResult<Self> {
        Ok(Self {
            auth_url: normalize_auth_url(auth_url)?,
            api_key: normalize_text_option(api_key),
            client: Client::builder().build()?,
            store,
            session: Mutex::new(None),
        })
    }

    /// Adopt a freshly signed-in session and persist it.
    pub async fn set_session(&self, session: AuthSession) -> AuthResult<()> {
        self.store.save_session(&session)?;
        *self.session.lock().await = Some(session);
        Ok(())
    }

    pub async fn sign_out(&self) -> AuthResult<()> {
        self.store.clear_session()?;
        *self.session.lock().await = None;
        Ok(())
    }

    pub async fn current_user(&self) -> AuthResult<Option<AuthUser>> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = self.store.load_session()?;
        }
        Ok(guard.as_ref().map(|session| session.user.clone()))
    }

    async fn refresh_locked(&self, current: &AuthSession) -> AuthResult<AuthSession> {
        if current.refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Refresh token must not be empty",
            ));
        }

        let payload = serde_json::json!({
            "refresh_token": current.refresh_token,
        });
        let mut request = self
            .client
            .post(format!("{}/token", self.auth_url))
            .query(&[("grant_type", "refresh_token")])
            .json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.header("apikey", api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::BAD_REQUEST {
                self.store.clear_session()?;
            }
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }

        let session = response
            .json::<TokenResponse>()
            .await?
            .into_session(current)?;
        self.store.save_session(&session)?;
        tracing::info!("Refreshed auth session for user {}", session.user.id);
        Ok(session)
    }
}

impl<S: SessionPersistence> TokenSource for RefreshingTokenSource<S> {
    async fn access_token(&self) -> AuthResult<String> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = self.store.load_session()?;
        }
        let Some(session) = guard.as_ref() else {
            return Err(AuthError::NotConfigured);
        };

        if !session.is_expired() {
            return Ok(session.access_token.clone());
        }

        let refreshed = self.refresh_locked(session).await?;
        let token = refreshed.access_token.clone();
        *guard = Some(refreshed);
        Ok(token)
    }

    async fn refresh(&self) -> AuthResult<String> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = self.store.load_session()?;
        }
        let Some(session) = guard.as_ref() else {
            return Err(AuthError::NotConfigured);
        };

        match self.refresh_locked(session).await {
            Ok(refreshed) => {
                let token = refreshed.access_token.clone();
                *guard = Some(refreshed);
                Ok(token)
            }
            Err(error) => {
                tracing::warn!("Failed to refresh auth session: {}", error);
                Err(error)
            }
        }
    }
}

pub fn normalize_auth_url(url: &str) -> AuthResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AuthError::InvalidConfiguration("Auth URL must not be empty"));
    }
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(AuthError::InvalidConfiguration(
            "Auth URL must include http:// or https://",
        ));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
    expires_in: Option<i64>,
    user: Option<TokenUser>,
}

impl TokenResponse {
    /// Fields the server leaves out are carried over from `previous`.
    fn into_session(self, previous: &AuthSession) -> AuthResult<AuthSession> {
        let access_token = normalize_text_option(self.access_token).ok_or_else(|| {
            AuthError::Api("Refresh response did not include an access token".to_string())
        })?;
        let expires_at = self
            .expires_at
            .or_else(|| {
                self.expires_in
                    .map(|expires_in| unix_timestamp_now().saturating_add(expires_in))
            })
            .ok_or_else(|| {
                AuthError::Api("Refresh response did not include an expiry".to_string())
            })?;

        Ok(AuthSession {
            access_token,
            refresh_token: normalize_text_option(self.refresh_token)
                .unwrap_or_else(|| previous.refresh_token.clone()),
            expires_at,
            user: self
                .user
                .map_or_else(|| previous.user.clone(), Into::into),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
    email: Option<String>,
}

impl From<TokenUser> for AuthUser {
    fn from(value: TokenUser) -> Self {
        Self {
            id: value.id,
            email: value.email,
        }
    }
}

fn unix_timestamp_now() -> i64 {
    chrono::Utc::now().timestamp()
}

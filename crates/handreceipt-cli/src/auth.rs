//! CLI bearer-token sources with secure keychain session persistence.

#[cfg(test)]
use std::collections::HashMap;
#[cfg(test)]
use std::sync::{Mutex, OnceLock};

#[cfg(not(test))]
use keyring::Entry;

use handreceipt_core::auth::{
    AuthResult, RefreshingTokenSource, SessionPersistence, StaticTokenSource, TokenSource,
};
pub use handreceipt_core::auth::{AuthError, AuthSession, AuthUser};

use crate::config_profiles::{CliProfile, ACCESS_TOKEN_ENV};

#[cfg(not(test))]
const KEYRING_SERVICE_NAME: &str = "handreceipt-cli";

#[derive(Clone)]
pub struct SessionStore {
    username: String,
}

impl SessionStore {
    pub fn new(profile_name: &str) -> Self {
        Self {
            username: format!("auth_session:{profile_name}"),
        }
    }

    #[cfg(test)]
    fn test_store() -> &'static Mutex<HashMap<String, String>> {
        static STORE: OnceLock<Mutex<HashMap<String, String>>> = OnceLock::new();
        STORE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[cfg(not(test))]
    fn entry(&self) -> AuthResult<Entry> {
        Entry::new(KEYRING_SERVICE_NAME, &self.username)
            .map_err(|error| AuthError::SecureStorage(error.to_string()))
    }
}

impl SessionPersistence for SessionStore {
    #[cfg(not(test))]
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        let entry = self.entry()?;
        match entry.get_password() {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(AuthError::SecureStorage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        let store = Self::test_store();
        let guard = store
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        if let Some(raw) = guard.get(&self.username) {
            Ok(Some(serde_json::from_str(raw)?))
        } else {
            Ok(None)
        }
    }

    #[cfg(not(test))]
    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        let raw = serde_json::to_string(session)?;
        self.entry()?
            .set_password(&raw)
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        Ok(())
    }

    #[cfg(test)]
    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        let raw = serde_json::to_string(session)?;
        let store = Self::test_store();
        let mut guard = store
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        guard.insert(self.username.clone(), raw);
        Ok(())
    }

    #[cfg(not(test))]
    fn clear_session(&self) -> AuthResult<()> {
        let entry = self.entry()?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(AuthError::SecureStorage(error.to_string())),
        }
    }

    #[cfg(test)]
    fn clear_session(&self) -> AuthResult<()> {
        let store = Self::test_store();
        let mut guard = store
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))?;
        guard.remove(&self.username);
        Ok(())
    }
}

/// Token source picked for a profile: an environment token wins over the
/// keychain session.
pub enum CliTokenSource {
    Static(StaticTokenSource),
    Session(RefreshingTokenSource<SessionStore>),
}

impl CliTokenSource {
    pub fn for_profile(profile_name: &str, profile: &CliProfile) -> AuthResult<Option<Self>> {
        Self::resolve(
            std::env::var(ACCESS_TOKEN_ENV).ok(),
            profile_name,
            profile,
        )
    }

    fn resolve(
        env_token: Option<String>,
        profile_name: &str,
        profile: &CliProfile,
    ) -> AuthResult<Option<Self>> {
        if let Some(token) = env_token.filter(|token| !token.trim().is_empty()) {
            return Ok(Some(Self::Static(StaticTokenSource::new(token)?)));
        }
        let Some(auth_url) = profile.auth_url() else {
            return Ok(None);
        };
        Ok(Some(Self::Session(RefreshingTokenSource::new(
            &auth_url,
            profile.auth_api_key.clone(),
            SessionStore::new(profile_name),
        )?)))
    }
}

impl TokenSource for CliTokenSource {
    async fn access_token(&self) -> AuthResult<String> {
        match self {
            Self::Static(source) => source.access_token().await,
            Self::Session(source) => source.access_token().await,
        }
    }

    async fn refresh(&self) -> AuthResult<String> {
        match self {
            Self::Static(source) => source.refresh().await,
            Self::Session(source) => source.refresh().await,
        }
    }
}

pub fn load_stored_session(profile_name: &str) -> AuthResult<Option<AuthSession>> {
    SessionStore::new(profile_name).load_session()
}

pub fn save_stored_session(profile_name: &str, session: &AuthSession) -> AuthResult<()> {
    SessionStore::new(profile_name).save_session(session)
}

pub fn clear_stored_session(profile_name: &str) -> AuthResult<()> {
    SessionStore::new(profile_name).clear_session()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(token: &str) -> AuthSession {
        AuthSession {
            access_token: token.to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: chrono::Utc::now().timestamp() + 3_600,
            user: AuthUser {
                id: "user-1".to_string(),
                email: None,
            },
        }
    }

    #[test]
    fn stored_session_roundtrip_is_per_profile() {
        save_stored_session("auth-test-a", &session("token-a")).unwrap();
        assert_eq!(
            load_stored_session("auth-test-a").unwrap(),
            Some(session("token-a"))
        );
        assert_eq!(load_stored_session("auth-test-b").unwrap(), None);

        clear_stored_session("auth-test-a").unwrap();
        assert_eq!(load_stored_session("auth-test-a").unwrap(), None);
    }

    #[tokio::test]
    async fn env_token_wins_over_session() {
        let profile = CliProfile {
            auth_url: Some("https://auth.example.com".to_string()),
            ..CliProfile::default()
        };
        let source = CliTokenSource::resolve(Some("env-token".to_string()), "env-test", &profile)
            .unwrap()
            .unwrap();
        assert!(matches!(source, CliTokenSource::Static(_)));
        assert_eq!(source.access_token().await.unwrap(), "env-token");
        assert!(source.refresh().await.is_err());
    }

    #[tokio::test]
    async fn session_source_reads_keychain() {
        let profile = CliProfile {
            auth_url: Some("https://auth.example.com".to_string()),
            ..CliProfile::default()
        };
        save_stored_session("session-test", &session("stored-token")).unwrap();
        let source = CliTokenSource::resolve(None, "session-test", &profile)
            .unwrap()
            .unwrap();
        assert_eq!(source.access_token().await.unwrap(), "stored-token");
    }

    #[test]
    fn no_token_without_env_or_auth_url() {
        let source = CliTokenSource::resolve(Some("  ".to_string()), "none", &CliProfile::default())
            .unwrap();
        assert!(source.is_none());
    }
}

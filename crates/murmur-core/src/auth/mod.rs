//! Session handling and the credential provider consumed by the channels and
//! the REST client.

mod client;
mod token;

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::UserId;
use crate::util::unix_timestamp_now;

pub use client::{normalize_api_url, AuthClient};
pub use token::{CredentialProvider, TokenManager};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user: Option<AuthUser>,
}

impl AuthSession {
    /// Expiry of the access token as a Unix timestamp, read from its `exp`
    /// claim.
    pub fn expires_at(&self) -> Option<i64> {
        jwt_expiry(&self.access_token)
    }

    /// True when the access token expires within `lead` from now.
    ///
    /// A token without a readable `exp` claim counts as expiring.
    #[must_use]
    pub fn expires_within(&self, lead: Duration) -> bool {
        let lead = i64::try_from(lead.as_secs()).unwrap_or(i64::MAX);
        self.expires_at()
            .is_none_or(|exp| exp <= unix_timestamp_now().saturating_add(lead))
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("user", &self.user)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Not signed in.")]
    NotSignedIn,
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Auth API error: {0}")]
    Api(String),
    #[error("Auth API error: {message}")]
    Status { status: u16, message: String },
    #[error("Secure storage error: {0}")]
    SecureStorage(String),
}

impl AuthError {
    /// True when the server refused the session itself, or it can never be
    /// refreshed. Outages and 5xx responses are not rejections.
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Status {
                status: 400 | 401 | 403,
                ..
            } | Self::InvalidConfiguration(_)
        )
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

pub trait SessionPersistence: Clone + Send + Sync + 'static {
    fn load_session(&self) -> AuthResult<Option<AuthSession>>;
    fn save_session(&self, session: &AuthSession) -> AuthResult<()>;
    fn clear_session(&self) -> AuthResult<()>;
}

/// Session persistence that lives only as long as the process.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    session: Arc<Mutex<Option<AuthSession>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: AuthSession) -> Self {
        Self {
            session: Arc::new(Mutex::new(Some(session))),
        }
    }
}

impl SessionPersistence for MemorySessionStore {
    fn load_session(&self) -> AuthResult<Option<AuthSession>> {
        self.session
            .lock()
            .map(|guard| guard.clone())
            .map_err(|error| AuthError::SecureStorage(error.to_string()))
    }

    fn save_session(&self, session: &AuthSession) -> AuthResult<()> {
        *self
            .session
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))? = Some(session.clone());
        Ok(())
    }

    fn clear_session(&self) -> AuthResult<()> {
        *self
            .session
            .lock()
            .map_err(|error| AuthError::SecureStorage(error.to_string()))? = None;
        Ok(())
    }
}

#[derive(Deserialize)]
struct JwtClaims {
    exp: Option<i64>,
}

/// Read the `exp` claim of a JWT without verifying its signature.
pub fn jwt_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice::<JwtClaims>(&bytes).ok()?.exp
}

#[cfg(test)]
pub(crate) fn fake_jwt(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp},"user_id":1}}"#));
    format!("{header}.{claims}.signature")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn session(access_token: String) -> AuthSession {
        AuthSession {
            access_token,
            refresh_token: "refresh".to_string(),
            user: None,
        }
    }

    #[test]
    fn reads_exp_claim() {
        assert_eq!(jwt_expiry(&fake_jwt(1_700_000_000)), Some(1_700_000_000));
        assert_eq!(jwt_expiry("not-a-jwt"), None);
        assert_eq!(jwt_expiry("a.!!!.c"), None);
    }

    #[test]
    fn expiry_lead_time() {
        let now = unix_timestamp_now();
        let lead = Duration::from_secs(10);
        assert!(!session(fake_jwt(now + 3_600)).expires_within(lead));
        assert!(session(fake_jwt(now + 5)).expires_within(lead));
        assert!(session("opaque".to_string()).expires_within(lead));
    }

    #[test]
    fn session_debug_redacts_tokens() {
        let session = AuthSession {
            access_token: "secret-access-token".to_string(),
            refresh_token: "secret-refresh-token".to_string(),
            user: Some(AuthUser {
                id: 1,
                username: "ana".to_string(),
                email: None,
            }),
        };
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret-access-token"));
        assert!(!rendered.contains("secret-refresh-token"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn only_client_errors_reject_the_session() {
        let status = |status| AuthError::Status {
            status,
            message: String::new(),
        };
        assert!(status(401).is_rejection());
        assert!(status(400).is_rejection());
        assert!(status(403).is_rejection());
        assert!(!status(500).is_rejection());
        assert!(!status(503).is_rejection());
        assert!(!status(429).is_rejection());
        assert!(!AuthError::NotSignedIn.is_rejection());
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemorySessionStore::new();
        assert_eq!(store.load_session().unwrap(), None);
        store.save_session(&session("a".to_string())).unwrap();
        assert_eq!(
            store.load_session().unwrap().map(|s| s.access_token),
            Some("a".to_string())
        );
        store.clear_session().unwrap();
        assert_eq!(store.load_session().unwrap(), None);
    }
}

//! Bearer credential provider with refresh-before-expiry.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;

use super::{AuthClient, AuthError, AuthResult, AuthSession, AuthUser, SessionPersistence};

/// Source of the bearer credential used by the REST client and the sockets.
pub trait CredentialProvider: Send + Sync + 'static {
    /// A token valid for longer than the refresh lead time, refreshing first
    /// if needed.
    fn access_token(&self) -> impl Future<Output = AuthResult<String>> + Send;

    fn is_authenticated(&self) -> bool;

    /// Drop the session locally and from persistence.
    fn sign_out(&self) -> impl Future<Output = AuthResult<()>> + Send;
}

/// Holds the current session and refreshes it through [`AuthClient`].
///
/// The session sits behind an async mutex so that concurrent callers wait on
/// a single in-flight refresh instead of racing their own.
pub struct TokenManager<S: SessionPersistence> {
    client: AuthClient<S>,
    session: Mutex<Option<AuthSession>>,
    authenticated: AtomicBool,
    refresh_lead: Duration,
}

impl<S: SessionPersistence> TokenManager<S> {
    pub fn new(client: AuthClient<S>, refresh_lead: Duration) -> Self {
        Self {
            client,
            session: Mutex::new(None),
            authenticated: AtomicBool::new(false),
            refresh_lead,
        }
    }

    /// Adopt the persisted session, if any.
    pub async fn restore(&self) -> AuthResult<Option<AuthUser>> {
        let restored = self.client.restore_session().await?;
        let user = restored.as_ref().and_then(|session| session.user.clone());
        self.install(restored).await;
        Ok(user)
    }

    pub async fn sign_in(&self, username_or_email: &str, password: &str) -> AuthResult<AuthSession> {
        let session = self.client.sign_in(username_or_email, password).await?;
        self.install(Some(session.clone())).await;
        Ok(session)
    }

    /// The signed-in user, when the server reported one.
    pub async fn user(&self) -> Option<AuthUser> {
        self.session
            .lock()
            .await
            .as_ref()
            .and_then(|session| session.user.clone())
    }

    /// Expiry of the current access token.
    pub async fn expires_at(&self) -> Option<i64> {
        self.session
            .lock()
            .await
            .as_ref()
            .and_then(AuthSession::expires_at)
    }

    async fn install(&self, session: Option<AuthSession>) {
        let mut guard = self.session.lock().await;
        self.authenticated.store(session.is_some(), Ordering::SeqCst);
        *guard = session;
    }
}

impl<S: SessionPersistence> CredentialProvider for TokenManager<S> {
    async fn access_token(&self) -> AuthResult<String> {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_ref() else {
            return Err(AuthError::NotSignedIn);
        };
        if !session.expires_within(self.refresh_lead) {
            return Ok(session.access_token.clone());
        }

        tracing::debug!("Access token near expiry, refreshing");
        let refreshed = self.client.refresh_session(session).await;
        match refreshed {
            Ok(refreshed) => {
                let token = refreshed.access_token.clone();
                *guard = Some(refreshed);
                Ok(token)
            }
            Err(error) if error.is_rejection() => {
                tracing::warn!("Refresh token rejected, signing out: {}", error);
                *guard = None;
                self.authenticated.store(false, Ordering::SeqCst);
                if let Err(clear_error) = self.client.sign_out() {
                    tracing::warn!("Failed to clear persisted session: {}", clear_error);
                }
                Err(error)
            }
            Err(error) => {
                tracing::warn!("Token refresh failed, keeping session: {}", error);
                Err(error)
            }
        }
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        self.install(None).await;
        self.client.sign_out()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{fake_jwt, MemorySessionStore};
    use crate::testing::http_status_server;
    use crate::util::unix_timestamp_now;
    use pretty_assertions::assert_eq;

    fn manager(store: MemorySessionStore) -> TokenManager<MemorySessionStore> {
        manager_at("http://127.0.0.1:9", store)
    }

    fn manager_at(url: &str, store: MemorySessionStore) -> TokenManager<MemorySessionStore> {
        let client = AuthClient::new(url, store).unwrap();
        TokenManager::new(client, Duration::from_secs(10))
    }

    fn session(access_token: String) -> AuthSession {
        AuthSession {
            access_token,
            refresh_token: "refresh".to_string(),
            user: Some(AuthUser {
                id: 4,
                username: "ana".to_string(),
                email: None,
            }),
        }
    }

    #[tokio::test]
    async fn no_session_means_not_signed_in() {
        let tokens = manager(MemorySessionStore::new());
        assert_eq!(tokens.restore().await.unwrap(), None);
        assert!(!tokens.is_authenticated());
        assert!(matches!(
            tokens.access_token().await,
            Err(AuthError::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_refresh() {
        let token = fake_jwt(unix_timestamp_now() + 3_600);
        let tokens = manager(MemorySessionStore::with_session(session(token.clone())));

        let user = tokens.restore().await.unwrap();

        assert_eq!(user.map(|u| u.username), Some("ana".to_string()));
        assert!(tokens.is_authenticated());
        assert_eq!(tokens.access_token().await.unwrap(), token);
    }

    #[tokio::test]
    async fn unreachable_refresh_keeps_session() {
        let token = fake_jwt(unix_timestamp_now() + 5);
        let tokens = manager(MemorySessionStore::with_session(session(token)));
        tokens.restore().await.unwrap();

        assert!(matches!(
            tokens.access_token().await,
            Err(AuthError::Http(_))
        ));
        assert!(tokens.is_authenticated());
    }

    #[tokio::test]
    async fn server_error_on_refresh_keeps_session_for_retry() {
        let url = http_status_server(503).await;
        let store = MemorySessionStore::with_session(session(fake_jwt(unix_timestamp_now() + 5)));
        let tokens = manager_at(&url, store.clone());
        tokens.restore().await.unwrap();

        for _ in 0..2 {
            assert!(matches!(
                tokens.access_token().await,
                Err(AuthError::Status { status: 503, .. })
            ));
        }
        assert!(tokens.is_authenticated());
        assert!(store.load_session().unwrap().is_some());
        assert_eq!(tokens.user().await.map(|user| user.id), Some(4));
    }

    #[tokio::test]
    async fn rejected_refresh_signs_out() {
        let url = http_status_server(401).await;
        let store = MemorySessionStore::with_session(session(fake_jwt(unix_timestamp_now() + 5)));
        let tokens = manager_at(&url, store.clone());
        tokens.restore().await.unwrap();

        assert!(matches!(
            tokens.access_token().await,
            Err(AuthError::Status { status: 401, .. })
        ));
        assert!(!tokens.is_authenticated());
        assert_eq!(store.load_session().unwrap(), None);
        assert!(matches!(
            tokens.access_token().await,
            Err(AuthError::NotSignedIn)
        ));
    }

    #[tokio::test]
    async fn sign_out_clears_memory_and_persistence() {
        let store = MemorySessionStore::with_session(session(fake_jwt(unix_timestamp_now() + 3_600)));
        let tokens = manager(store.clone());
        tokens.restore().await.unwrap();

        tokens.sign_out().await.unwrap();

        assert!(!tokens.is_authenticated());
        assert_eq!(store.load_session().unwrap(), None);
        assert_eq!(tokens.user().await, None);
    }
}

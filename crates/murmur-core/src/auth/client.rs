//! Token endpoints of the API.

use reqwest::{Client, RequestBuilder};
use serde::Deserialize;

use super::{AuthError, AuthResult, AuthSession, AuthUser, SessionPersistence};
use crate::util::{is_http_url, parse_api_error, HTTP_TIMEOUT};

#[derive(Clone)]
pub struct AuthClient<S: SessionPersistence> {
    api_url: String,
    client: Client,
    store: S,
}

impl<S: SessionPersistence> AuthClient<S> {
    pub fn new(api_url: impl AsRef<str>, store: S) -> AuthResult<Self> {
        Ok(Self {
            api_url: normalize_api_url(api_url.as_ref())?,
            client: Client::builder().timeout(HTTP_TIMEOUT).build()?,
            store,
        })
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Load the persisted session, refreshing it when the access token has
    /// already expired. A session whose refresh is rejected is cleared; one
    /// that could not be refreshed for any other reason is kept.
    pub async fn restore_session(&self) -> AuthResult<Option<AuthSession>> {
        let Some(stored_session) = self.store.load_session()? else {
            return Ok(None);
        };

        if !stored_session.expires_within(std::time::Duration::ZERO) {
            return Ok(Some(stored_session));
        }

        match self.refresh_session(&stored_session).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(error) if error.is_rejection() => {
                tracing::warn!("Persisted session rejected, clearing it: {}", error);
                self.store.clear_session()?;
                Ok(None)
            }
            Err(error) => {
                tracing::warn!("Could not refresh persisted session, keeping it: {}", error);
                Ok(Some(stored_session))
            }
        }
    }

    /// Exchange credentials for a token pair and persist it.
    pub async fn sign_in(&self, username_or_email: &str, password: &str) -> AuthResult<AuthSession> {
        validate_credentials(username_or_email, password)?;

        let payload = serde_json::json!({
            "username_or_email": username_or_email.trim(),
            "password": password,
        });
        let request = self
            .client
            .post(format!("{}/token/", self.api_url))
            .json(&payload);

        let response: TokenResponse = self.send_token_request(request).await?;
        let refresh_token = response.refresh.ok_or_else(|| {
            AuthError::Api("Sign-in response did not include a refresh token".to_string())
        })?;
        let session = AuthSession {
            access_token: response.access,
            refresh_token,
            user: response.user,
        };

        self.store.save_session(&session)?;
        Ok(session)
    }

    /// Trade the refresh token for a new access token and persist the result.
    ///
    /// The previous refresh token is kept when the server does not rotate it.
    pub async fn refresh_session(&self, session: &AuthSession) -> AuthResult<AuthSession> {
        if session.refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Refresh token must not be empty",
            ));
        }

        let payload = serde_json::json!({
            "refresh": session.refresh_token,
        });
        let request = self
            .client
            .post(format!("{}/token/refresh/", self.api_url))
            .json(&payload);
        let response: TokenResponse = self.send_token_request(request).await?;
        let refreshed = response.into_refreshed(session);

        self.store.save_session(&refreshed)?;
        Ok(refreshed)
    }

    /// Forget the persisted session. Tokens are stateless on the server.
    pub fn sign_out(&self) -> AuthResult<()> {
        self.store.clear_session()
    }

    async fn send_token_request(&self, request: RequestBuilder) -> AuthResult<TokenResponse> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Status {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }
        Ok(response.json::<TokenResponse>().await?)
    }
}

pub fn normalize_api_url(url: &str) -> AuthResult<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AuthError::InvalidConfiguration("API URL must not be empty"));
    }
    if !is_http_url(trimmed) {
        return Err(AuthError::InvalidConfiguration(
            "API URL must include http:// or https://",
        ));
    }
    Ok(trimmed.to_string())
}

fn validate_credentials(username_or_email: &str, password: &str) -> AuthResult<()> {
    if username_or_email.trim().is_empty() {
        return Err(AuthError::Api("Username or email is required".to_string()));
    }
    if password.trim().is_empty() {
        return Err(AuthError::Api("Password is required".to_string()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
    #[serde(default)]
    user: Option<AuthUser>,
}

impl TokenResponse {
    fn into_refreshed(self, previous: &AuthSession) -> AuthSession {
        AuthSession {
            access_token: self.access,
            refresh_token: self
                .refresh
                .unwrap_or_else(|| previous.refresh_token.clone()),
            user: self.user.or_else(|| previous.user.clone()),
        }
    }
}

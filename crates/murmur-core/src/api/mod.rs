//! REST contracts consumed by the sync layer.

use std::future::Future;
use std::sync::Arc;

use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::auth::{normalize_api_url, AuthError, CredentialProvider};
use crate::models::{
    de, ConversationSnapshot, MessagePage, NotificationId, NotificationRecord, ThreadId, UserId,
};
use crate::util::{parse_api_error, HTTP_TIMEOUT};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("API error: {0}")]
    Api(String),
    #[error("Unexpected response payload: {0}")]
    Payload(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Result of marking a thread read on the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkReadResponse {
    #[serde(default)]
    pub status: String,
    /// Messages that went from unread to read
    #[serde(default, deserialize_with = "de::count")]
    pub marked_read: u32,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub thread_id: Option<ThreadId>,
    #[serde(default, deserialize_with = "de::opt_id")]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub username: Option<String>,
}

/// The REST endpoints the sync engine calls.
pub trait ChatApi: Send + Sync + 'static {
    fn fetch_conversations(&self) -> impl Future<Output = ApiResult<ConversationSnapshot>> + Send;

    /// One page of a thread, oldest first within the page.
    fn fetch_messages(
        &self,
        thread_id: ThreadId,
        offset: usize,
        limit: usize,
    ) -> impl Future<Output = ApiResult<MessagePage>> + Send;

    fn mark_thread_read(
        &self,
        thread_id: ThreadId,
    ) -> impl Future<Output = ApiResult<MarkReadResponse>> + Send;

    fn fetch_notifications(&self) -> impl Future<Output = ApiResult<Vec<NotificationRecord>>> + Send;

    fn mark_all_notifications_read(&self) -> impl Future<Output = ApiResult<()>> + Send;

    fn mark_notification_read(
        &self,
        id: NotificationId,
    ) -> impl Future<Output = ApiResult<()>> + Send;
}

/// `reqwest` implementation of [`ChatApi`] with bearer auth.
pub struct RestClient<P: CredentialProvider> {
    api_url: String,
    client: Client,
    credentials: Arc<P>,
}

impl<P: CredentialProvider> RestClient<P> {
    pub fn new(api_url: impl AsRef<str>, credentials: Arc<P>) -> ApiResult<Self> {
        Ok(Self {
            api_url: normalize_api_url(api_url.as_ref())?,
            client: Client::builder().timeout(HTTP_TIMEOUT).build()?,
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path.trim_start_matches('/'))
    }

    async fn request(&self, method: Method, path: &str) -> ApiResult<RequestBuilder> {
        let token = self.credentials.access_token().await?;
        Ok(self
            .client
            .request(method, self.url(path))
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json"))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Api(parse_api_error(status, &body)));
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return serde_json::from_value(Value::Null)
                .map_err(|error| ApiError::Payload(error.to_string()));
        }
        serde_json::from_str(&body).map_err(|error| ApiError::Payload(error.to_string()))
    }
}

impl<P: CredentialProvider> ChatApi for RestClient<P> {
    async fn fetch_conversations(&self) -> ApiResult<ConversationSnapshot> {
        let request = self.request(Method::GET, "chats/conversations/").await?;
        let payload: Value = self.send_json(request).await?;
        Ok(ConversationSnapshot::from_value(payload))
    }

    async fn fetch_messages(
        &self,
        thread_id: ThreadId,
        offset: usize,
        limit: usize,
    ) -> ApiResult<MessagePage> {
        let request = self
            .request(Method::GET, &format!("chats/threads/{thread_id}/messages/"))
            .await?
            .query(&[("offset", offset), ("limit", limit)]);
        self.send_json(request).await
    }

    async fn mark_thread_read(&self, thread_id: ThreadId) -> ApiResult<MarkReadResponse> {
        let request = self
            .request(Method::POST, &format!("chats/threads/{thread_id}/mark-read/"))
            .await?;
        let payload: Value = self.send_json(request).await?;
        Ok(serde_json::from_value(payload).unwrap_or_else(|error| {
            tracing::warn!(thread_id, "Unexpected mark-read response: {}", error);
            MarkReadResponse::default()
        }))
    }

    async fn fetch_notifications(&self) -> ApiResult<Vec<NotificationRecord>> {
        let request = self.request(Method::GET, "notifications/").await?;
        let payload: Value = self.send_json(request).await?;
        Ok(NotificationRecord::list_from_value(payload))
    }

    async fn mark_all_notifications_read(&self) -> ApiResult<()> {
        let request = self
            .request(Method::POST, "notifications/mark-all-read/")
            .await?;
        let _: Value = self.send_json(request).await?;
        Ok(())
    }

    async fn mark_notification_read(&self, id: NotificationId) -> ApiResult<()> {
        let request = self
            .request(Method::POST, &format!("notifications/{id}/read/"))
            .await?;
        let _: Value = self.send_json(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCredentials;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn mark_read_response_parses_server_shape() {
        let response: MarkReadResponse = serde_json::from_value(json!({
            "status": "success",
            "marked_read": 3,
            "thread_id": 12,
            "user_id": 4,
            "username": "ana"
        }))
        .unwrap();
        assert_eq!(
            response,
            MarkReadResponse {
                status: "success".to_string(),
                marked_read: 3,
                thread_id: Some(12),
                user_id: Some(4),
                username: Some("ana".to_string()),
            }
        );
    }

    #[test]
    fn mark_read_response_tolerates_missing_fields() {
        let response: MarkReadResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(response.marked_read, 0);
    }

    #[test]
    fn urls_join_without_duplicate_slashes() {
        let client = RestClient::new(
            "https://example.com/api/",
            Arc::new(FakeCredentials::signed_in()),
        )
        .unwrap();
        assert_eq!(
            client.url("/chats/conversations/"),
            "https://example.com/api/chats/conversations/"
        );
    }

    #[tokio::test]
    async fn signed_out_requests_fail_before_sending() {
        let client = RestClient::new(
            "http://127.0.0.1:9",
            Arc::new(FakeCredentials::signed_out()),
        )
        .unwrap();
        assert!(matches!(
            client.fetch_conversations().await,
            Err(ApiError::Auth(AuthError::NotSignedIn))
        ));
    }
}

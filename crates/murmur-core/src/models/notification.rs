//! Notification model

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{de, NotificationId};

/// Notification category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Follow,
    Like,
    Comment,
    Mention,
    /// Any category this client does not know about yet
    #[serde(other)]
    Other,
}

/// User who triggered a notification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default, deserialize_with = "de::truthy")]
    pub is_following: bool,
}

/// A notification as pushed by the server or returned by the list endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    #[serde(deserialize_with = "de::id")]
    pub id: NotificationId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(alias = "user", default)]
    pub actor: Actor,
    #[serde(default)]
    pub content: String,
    #[serde(alias = "time", default)]
    pub created_at: String,
    #[serde(default, deserialize_with = "de::truthy")]
    pub is_read: bool,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(alias = "postImage", default)]
    pub post_image: Option<String>,
}

impl NotificationRecord {
    /// Normalize a notification list payload: a bare array or a paginated
    /// `{ "results": [...] }` envelope.
    ///
    /// Entries that fail to parse are skipped; any other shape yields an
    /// empty list.
    pub fn list_from_value(payload: Value) -> Vec<Self> {
        let items = match payload {
            Value::Array(items) => items,
            Value::Object(mut envelope) => match envelope.remove("results") {
                Some(Value::Array(items)) => items,
                _ => {
                    tracing::warn!("Notification payload envelope has no result list");
                    return Vec::new();
                }
            },
            _ => {
                tracing::warn!("Unexpected notification payload shape, using empty list");
                return Vec::new();
            }
        };

        items
            .into_iter()
            .filter_map(|item| {
                serde_json::from_value(item)
                    .map_err(|error| {
                        tracing::warn!("Skipping malformed notification entry: {}", error);
                    })
                    .ok()
            })
            .collect()
    }
}

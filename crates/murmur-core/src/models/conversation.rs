//! Conversation model

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{de, ThreadId, UserId};

/// Aggregate client-side view of one peer-to-peer thread.
///
/// Timestamps are kept exactly as the server formats them; the client never
/// orders conversations by time, only by the move-to-top rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    #[serde(deserialize_with = "de::id")]
    pub id: ThreadId,
    #[serde(alias = "username", default)]
    pub peer_username: String,
    #[serde(alias = "avatar", default)]
    pub peer_avatar: Option<String>,
    #[serde(alias = "partner_id", default, deserialize_with = "de::id_or_zero")]
    pub peer_id: UserId,
    #[serde(alias = "lastMessage", default)]
    pub last_message: String,
    #[serde(alias = "time", default)]
    pub last_message_time: String,
    #[serde(alias = "unread", default, deserialize_with = "de::count")]
    pub unread_count: u32,
    #[serde(default, deserialize_with = "de::truthy")]
    pub online: bool,
    #[serde(default)]
    pub last_active: Option<String>,
}

/// Per-item failure reported alongside a partially successful list fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotError {
    pub conversation_id: Option<ThreadId>,
    pub message: String,
}

/// Normalized result of a conversation list fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationSnapshot {
    pub conversations: Vec<ConversationRecord>,
    pub errors: Vec<SnapshotError>,
}

impl ConversationSnapshot {
    /// Normalize any conversation list payload.
    ///
    /// Accepts a bare array or a `{ "conversations": [...], "errors": [...] }`
    /// envelope. Anything else yields an empty snapshot. Individual entries
    /// that fail to parse are skipped and reported in `errors`.
    pub fn from_value(payload: Value) -> Self {
        let (items, raw_errors) = match payload {
            Value::Array(items) => (items, Vec::new()),
            Value::Object(mut envelope) => {
                let items = match envelope.remove("conversations") {
                    Some(Value::Array(items)) => items,
                    _ => {
                        tracing::warn!("Conversation payload envelope has no conversation list");
                        return Self::default();
                    }
                };
                let errors = match envelope.remove("errors") {
                    Some(Value::Array(errors)) => errors,
                    _ => Vec::new(),
                };
                (items, errors)
            }
            other => {
                tracing::warn!(
                    kind = value_kind(&other),
                    "Unexpected conversation payload shape, using empty list"
                );
                return Self::default();
            }
        };

        let mut snapshot = Self {
            conversations: Vec::with_capacity(items.len()),
            errors: raw_errors.into_iter().map(parse_snapshot_error).collect(),
        };

        for item in items {
            let candidate_id = item.get("id").and_then(Value::as_i64);
            match serde_json::from_value::<ConversationRecord>(item) {
                Ok(record) => snapshot.conversations.push(record),
                Err(error) => {
                    tracing::warn!("Skipping malformed conversation entry: {}", error);
                    snapshot.errors.push(SnapshotError {
                        conversation_id: candidate_id,
                        message: format!("malformed conversation entry: {error}"),
                    });
                }
            }
        }

        snapshot
    }
}

fn parse_snapshot_error(value: Value) -> SnapshotError {
    match value {
        Value::String(message) => SnapshotError {
            conversation_id: None,
            message,
        },
        Value::Object(fields) => {
            let conversation_id = ["conversation_id", "thread_id", "id"]
                .iter()
                .find_map(|key| fields.get(*key).and_then(Value::as_i64));
            let message = ["error", "message", "detail"]
                .iter()
                .find_map(|key| fields.get(*key).and_then(Value::as_str))
                .unwrap_or("unknown error")
                .to_string();
            SnapshotError {
                conversation_id,
                message,
            }
        }
        other => SnapshotError {
            conversation_id: None,
            message: other.to_string(),
        },
    }
}

const fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

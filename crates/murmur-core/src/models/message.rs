//! Message model

use serde::{Deserialize, Serialize};

use super::{de, UserId};

/// One message in the currently open thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Server message id
    #[serde(deserialize_with = "de::string_id")]
    pub id: String,
    /// Message body
    #[serde(default)]
    pub text: String,
    /// Server-formatted send time
    #[serde(alias = "time", default)]
    pub sent_at: String,
    /// Whether the local user sent this message
    #[serde(alias = "isOwn", default, deserialize_with = "de::truthy")]
    pub is_own: bool,
    /// Sender username, when the server includes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Sender user id, when the server includes it
    #[serde(
        default,
        deserialize_with = "de::opt_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub sender_id: Option<UserId>,
    /// Users known to have read this message (own messages only)
    #[serde(alias = "readByIds", default, skip_serializing_if = "Vec::is_empty")]
    pub read_by: Vec<UserId>,
}

impl MessageRecord {
    /// Record `reader` as having read this message. Returns `false` when
    /// it was already recorded.
    pub fn mark_read_by(&mut self, reader: UserId) -> bool {
        if self.read_by.contains(&reader) {
            false
        } else {
            self.read_by.push(reader);
            true
        }
    }
}

/// One offset page of thread history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    /// Total number of messages in the thread
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    /// Messages in ascending send order
    #[serde(default)]
    pub results: Vec<MessageRecord>,
}

//! Push-channel frame codecs.
//!
//! Each channel delivers JSON text frames. Decoding dispatches on the `type`
//! field where the server sets one and otherwise on the presence of the keys
//! that identify a shape. Anything unrecognised is an [`EventError`]; callers
//! log and drop it.

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::{de, MessageRecord, NotificationRecord, ThreadId, UserId};

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unrecognized {channel} frame (type: {kind})")]
    Unrecognized {
        channel: &'static str,
        kind: String,
    },
}

/// Sender block of a conversation update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default, deserialize_with = "de::id_or_zero")]
    pub id: UserId,
}

/// A new message landed in some conversation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConversationUpdate {
    #[serde(deserialize_with = "de::id")]
    pub chat_id: ThreadId,
    #[serde(alias = "message_text", default)]
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub sender: Sender,
    #[serde(default, deserialize_with = "de::truthy")]
    pub is_sender: bool,
    #[serde(default, deserialize_with = "de::opt_count")]
    pub unread_count: Option<u32>,
}

/// Online/offline transition for a user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresenceUpdate {
    #[serde(deserialize_with = "de::id")]
    pub user_id: UserId,
    #[serde(default, deserialize_with = "de::truthy")]
    pub online: bool,
    #[serde(default)]
    pub last_active: Option<String>,
}

/// Read-state signal for a conversation, delivered on the conversations
/// channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSignal {
    /// `mark_read_update`: server-computed unread count after a read.
    Update {
        chat_id: ThreadId,
        unread_count: Option<u32>,
    },
    /// `mark_read`: the thread was read somewhere.
    Read { chat_id: ThreadId },
}

impl ReadSignal {
    pub const fn chat_id(&self) -> ThreadId {
        match self {
            Self::Update { chat_id, .. } | Self::Read { chat_id } => *chat_id,
        }
    }
}

/// Events carried by the global conversations channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationsEvent {
    Update(ConversationUpdate),
    Read(ReadSignal),
    Presence(PresenceUpdate),
}

/// Events carried by a per-thread chat channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Message(MessageRecord),
    ReadReceipt { message_id: String, reader_id: UserId },
}

#[derive(Deserialize)]
struct ReadFrame {
    #[serde(deserialize_with = "de::id")]
    chat_id: ThreadId,
    #[serde(default, deserialize_with = "de::opt_count")]
    unread_count: Option<u32>,
}

#[derive(Deserialize)]
struct ReceiptFrame {
    #[serde(deserialize_with = "de::string_id")]
    message_id: String,
    #[serde(deserialize_with = "de::id")]
    reader_id: UserId,
}

fn frame_type(value: &Value) -> Option<String> {
    value.get("type").and_then(Value::as_str).map(str::to_owned)
}

fn looks_like_update(value: &Value) -> bool {
    ["chat_id", "message", "timestamp", "sender"]
        .iter()
        .all(|key| value.get(*key).is_some_and(|field| !field.is_null()))
}

/// Decode one frame from the conversations channel.
pub fn decode_conversations_frame(text: &str) -> Result<ConversationsEvent, EventError> {
    let value: Value = serde_json::from_str(text)?;
    let kind = frame_type(&value);
    match kind.as_deref() {
        Some("mark_read_update") => {
            let frame: ReadFrame = serde_json::from_value(value)?;
            Ok(ConversationsEvent::Read(ReadSignal::Update {
                chat_id: frame.chat_id,
                unread_count: frame.unread_count,
            }))
        }
        Some("mark_read") => {
            let frame: ReadFrame = serde_json::from_value(value)?;
            Ok(ConversationsEvent::Read(ReadSignal::Read {
                chat_id: frame.chat_id,
            }))
        }
        Some("presence_update") => Ok(ConversationsEvent::Presence(serde_json::from_value(
            value,
        )?)),
        Some("chat_update") => Ok(ConversationsEvent::Update(serde_json::from_value(value)?)),
        _ if looks_like_update(&value) => {
            Ok(ConversationsEvent::Update(serde_json::from_value(value)?))
        }
        kind => Err(EventError::Unrecognized {
            channel: "conversations",
            kind: kind.unwrap_or("untyped").to_string(),
        }),
    }
}

/// Decode one frame from a thread chat channel.
pub fn decode_chat_frame(text: &str) -> Result<ChatEvent, EventError> {
    let value: Value = serde_json::from_str(text)?;
    let kind = frame_type(&value);
    match kind.as_deref() {
        Some("read_receipt") => {
            let frame: ReceiptFrame = serde_json::from_value(value)?;
            Ok(ChatEvent::ReadReceipt {
                message_id: frame.message_id,
                reader_id: frame.reader_id,
            })
        }
        Some("chat_message") | None if value.get("id").is_some() => {
            Ok(ChatEvent::Message(serde_json::from_value(value)?))
        }
        kind => Err(EventError::Unrecognized {
            channel: "chat",
            kind: kind.unwrap_or("untyped").to_string(),
        }),
    }
}

/// Decode one frame from the notifications channel. The server pushes the
/// whole notification record.
pub fn decode_notification_frame(text: &str) -> Result<NotificationRecord, EventError> {
    Ok(serde_json::from_str(text)?)
}

/// Outbound frames on a thread chat channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Send a chat message; the channel echo is the confirmation.
    Text(String),
    /// Ask the server to mark the thread read for this user.
    MarkRead,
}

impl ChatCommand {
    /// Serialize to the wire frame.
    pub fn encode(&self) -> String {
        match self {
            Self::Text(text) => json!({ "text": text }).to_string(),
            Self::MarkRead => json!({ "type": "mark_read" }).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decodes_untyped_conversation_update() {
        let event = decode_conversations_frame(
            r#"{"chat_id": "3", "message": "yo", "timestamp": "1:00 PM",
                "sender": {"username": "ana", "avatar": null, "id": 8},
                "is_sender": false}"#,
        )
        .unwrap();
        let ConversationsEvent::Update(update) = event else {
            panic!("expected update, got {event:?}");
        };
        assert_eq!(update.chat_id, 3);
        assert_eq!(update.sender.id, 8);
        assert_eq!(update.unread_count, None);
        assert!(!update.is_sender);
    }

    #[test]
    fn decodes_read_signals() {
        assert_eq!(
            decode_conversations_frame(
                r#"{"type": "mark_read_update", "chat_id": 4, "unread_count": 0}"#
            )
            .unwrap(),
            ConversationsEvent::Read(ReadSignal::Update {
                chat_id: 4,
                unread_count: Some(0),
            })
        );
        assert_eq!(
            decode_conversations_frame(r#"{"type": "mark_read", "chat_id": 4}"#).unwrap(),
            ConversationsEvent::Read(ReadSignal::Read { chat_id: 4 })
        );
    }

    #[test]
    fn decodes_presence() {
        let event = decode_conversations_frame(
            r#"{"type": "presence_update", "user_id": 5, "online": 1}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ConversationsEvent::Presence(PresenceUpdate {
                user_id: 5,
                online: true,
                last_active: None,
            })
        );
    }

    #[test]
    fn rejects_unknown_and_malformed_frames() {
        assert!(matches!(
            decode_conversations_frame(r#"{"type": "typing", "chat_id": 1}"#),
            Err(EventError::Unrecognized { .. })
        ));
        assert!(matches!(
            decode_conversations_frame("not json"),
            Err(EventError::Json(_))
        ));
        assert!(decode_conversations_frame(r#"{"chat_id": 1, "message": "x"}"#).is_err());
    }

    #[test]
    fn decodes_chat_frames() {
        let message = decode_chat_frame(
            r#"{"id": 10, "text": "hi", "time": "2:00 PM", "sender": "bo", "isOwn": false}"#,
        )
        .unwrap();
        assert!(matches!(message, ChatEvent::Message(ref m) if m.id == "10"));

        let receipt =
            decode_chat_frame(r#"{"type": "read_receipt", "message_id": 10, "reader_id": 2}"#)
                .unwrap();
        assert_eq!(
            receipt,
            ChatEvent::ReadReceipt {
                message_id: "10".to_string(),
                reader_id: 2,
            }
        );
    }

    #[test]
    fn encodes_outbound_frames() {
        assert_eq!(
            ChatCommand::Text("hey".to_string()).encode(),
            r#"{"text":"hey"}"#
        );
        assert_eq!(ChatCommand::MarkRead.encode(), r#"{"type":"mark_read"}"#);
    }
}

//! Data models for Murmur

mod conversation;
pub(crate) mod de;
mod message;
mod notification;

pub use conversation::{ConversationRecord, ConversationSnapshot, SnapshotError};
pub use message::{MessagePage, MessageRecord};
pub use notification::{Actor, NotificationKind, NotificationRecord};

/// Server-assigned conversation (thread) identifier
pub type ThreadId = i64;

/// Server-assigned user identifier
pub type UserId = i64;

/// Server-assigned notification identifier
pub type NotificationId = i64;

//! Conversation store and its merge/reorder rules

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{persist, rehydrate};
use crate::events::ConversationUpdate;
use crate::models::{ConversationRecord, ConversationSnapshot, SnapshotError, ThreadId, UserId};
use crate::storage::StateStorage;

/// Storage key for the serialized conversation table
pub const CONVERSATION_STORAGE_KEY: &str = "conversation-storage";

/// Prefix applied to the preview of messages the local user sent
pub const OWN_MESSAGE_PREFIX: &str = "You: ";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedConversations {
    #[serde(default)]
    conversations: Vec<ConversationRecord>,
}

/// What `apply_inbound_message` did to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Unknown conversation; a new record was prepended
    Created,
    /// Existing record updated; `moved_to_top` reports a reorder
    Updated { moved_to_top: bool },
}

/// What `mark_read` did to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkReadOutcome {
    Cleared,
    AlreadyRead,
    NotFound,
}

/// Ordered, persisted table of conversations.
pub struct ConversationStore {
    conversations: Vec<ConversationRecord>,
    storage: Arc<dyn StateStorage>,
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("conversations", &self.conversations)
            .finish_non_exhaustive()
    }
}

impl ConversationStore {
    /// Create a store rehydrated from `storage`.
    pub fn new(storage: Arc<dyn StateStorage>) -> Self {
        let persisted: PersistedConversations =
            rehydrate(storage.as_ref(), CONVERSATION_STORAGE_KEY);
        Self {
            conversations: dedupe(persisted.conversations),
            storage,
        }
    }

    /// Conversations in display order
    pub fn list(&self) -> &[ConversationRecord] {
        &self.conversations
    }

    pub fn get(&self, id: ThreadId) -> Option<&ConversationRecord> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Sum of unread counts across all conversations
    pub fn total_unread(&self) -> u32 {
        self.conversations
            .iter()
            .fold(0_u32, |total, c| total.saturating_add(c.unread_count))
    }

    /// Replace the whole table with a fresh list.
    pub fn replace_all(&mut self, conversations: Vec<ConversationRecord>) {
        self.conversations = dedupe(conversations);
        self.save();
    }

    /// Replace the whole table from a raw list payload of any shape.
    ///
    /// Returns the per-item errors the payload reported or that parsing hit.
    pub fn replace_all_payload(&mut self, payload: Value) -> Vec<SnapshotError> {
        self.apply_snapshot(ConversationSnapshot::from_value(payload))
    }

    /// Replace the whole table from a normalized snapshot, handing back its
    /// per-item errors.
    pub fn apply_snapshot(&mut self, snapshot: ConversationSnapshot) -> Vec<SnapshotError> {
        for error in &snapshot.errors {
            tracing::warn!(
                thread_id = error.conversation_id,
                "Conversation fetch reported an error: {}",
                error.message
            );
        }
        self.replace_all(snapshot.conversations);
        snapshot.errors
    }

    /// Merge a pushed "new message" event.
    ///
    /// A conversation only moves to the top when the event adds unread
    /// messages sent by someone else.
    pub fn apply_inbound_message(&mut self, update: &ConversationUpdate) -> InboundOutcome {
        let preview = if update.is_sender {
            format!("{OWN_MESSAGE_PREFIX}{}", update.message)
        } else {
            update.message.clone()
        };
        let unread_count = update
            .unread_count
            .unwrap_or_else(|| u32::from(!update.is_sender));

        let outcome = match self.position(update.chat_id) {
            Some(index) => {
                let next = ConversationRecord {
                    last_message: preview,
                    last_message_time: update.timestamp.clone(),
                    unread_count,
                    ..self.conversations[index].clone()
                };
                let moved_to_top = unread_count > 0 && !update.is_sender;
                if moved_to_top {
                    self.conversations.remove(index);
                    self.conversations.insert(0, next);
                } else {
                    self.conversations[index] = next;
                }
                InboundOutcome::Updated { moved_to_top }
            }
            None => {
                let username = if update.sender.username.is_empty() {
                    "Unknown".to_string()
                } else {
                    update.sender.username.clone()
                };
                self.conversations.insert(
                    0,
                    ConversationRecord {
                        id: update.chat_id,
                        peer_username: username,
                        peer_avatar: update.sender.avatar.clone(),
                        peer_id: update.sender.id,
                        last_message: preview,
                        last_message_time: update.timestamp.clone(),
                        unread_count,
                        online: false,
                        last_active: None,
                    },
                );
                InboundOutcome::Created
            }
        };

        self.save();
        outcome
    }

    /// Apply a presence change to every conversation with `peer_id`.
    ///
    /// Returns how many records changed. A missing `last_active` keeps the
    /// previously known value.
    pub fn set_presence(
        &mut self,
        peer_id: UserId,
        online: bool,
        last_active: Option<&str>,
    ) -> usize {
        let mut changed = 0;
        for record in &mut self.conversations {
            if record.peer_id != peer_id {
                continue;
            }
            let next = ConversationRecord {
                online,
                last_active: last_active
                    .map(str::to_owned)
                    .or_else(|| record.last_active.clone()),
                ..record.clone()
            };
            if next != *record {
                *record = next;
                changed += 1;
            }
        }
        if changed > 0 {
            self.save();
        }
        changed
    }

    /// Set the unread count of `id` to zero. Never creates a record and
    /// never reorders.
    pub fn mark_read(&mut self, id: ThreadId) -> MarkReadOutcome {
        let Some(index) = self.position(id) else {
            tracing::warn!(thread_id = id, "Cannot mark conversation read: not in store");
            return MarkReadOutcome::NotFound;
        };
        if self.conversations[index].unread_count == 0 {
            return MarkReadOutcome::AlreadyRead;
        }
        self.conversations[index] = ConversationRecord {
            unread_count: 0,
            ..self.conversations[index].clone()
        };
        self.save();
        MarkReadOutcome::Cleared
    }

    /// Drop every conversation (logout).
    pub fn clear(&mut self) {
        self.conversations.clear();
        if let Err(error) = self.storage.remove(CONVERSATION_STORAGE_KEY) {
            tracing::warn!("Failed to clear persisted conversations: {}", error);
        }
    }

    fn position(&self, id: ThreadId) -> Option<usize> {
        self.conversations.iter().position(|c| c.id == id)
    }

    fn save(&self) {
        persist(
            self.storage.as_ref(),
            CONVERSATION_STORAGE_KEY,
            &PersistedConversationsRef {
                conversations: &self.conversations,
            },
        );
    }
}

#[derive(Serialize)]
struct PersistedConversationsRef<'a> {
    conversations: &'a [ConversationRecord],
}

/// Keep the first occurrence of each id.
fn dedupe(conversations: Vec<ConversationRecord>) -> Vec<ConversationRecord> {
    let mut seen = HashSet::with_capacity(conversations.len());
    conversations
        .into_iter()
        .filter(|c| {
            let fresh = seen.insert(c.id);
            if !fresh {
                tracing::warn!(thread_id = c.id, "Dropping duplicate conversation");
            }
            fresh
        })
        .collect()
}

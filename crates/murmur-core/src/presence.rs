//! Presence propagation onto the conversation store

use crate::events::PresenceUpdate;
use crate::store::ConversationStore;

/// Apply a presence signal to every conversation with the signalled peer.
///
/// Total over the store: an unknown peer changes nothing. Returns the number
/// of conversations updated.
pub fn apply_presence(store: &mut ConversationStore, update: &PresenceUpdate) -> usize {
    let changed = store.set_presence(update.user_id, update.online, update.last_active.as_deref());
    if changed == 0 {
        tracing::debug!(user_id = update.user_id, "Presence update matched no conversation");
    }
    changed
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::ConversationRecord;
    use crate::storage::MemoryStorage;
    use pretty_assertions::assert_eq;

    fn record(id: i64, peer_id: i64, last_active: Option<&str>) -> ConversationRecord {
        ConversationRecord {
            id,
            peer_username: String::new(),
            peer_avatar: None,
            peer_id,
            last_message: String::new(),
            last_message_time: String::new(),
            unread_count: 0,
            online: false,
            last_active: last_active.map(str::to_owned),
        }
    }

    #[test]
    fn missing_last_active_keeps_known_value() {
        let mut store = ConversationStore::new(Arc::new(MemoryStorage::new()));
        store.replace_all(vec![record(1, 5, Some("yesterday"))]);

        apply_presence(
            &mut store,
            &PresenceUpdate {
                user_id: 5,
                online: true,
                last_active: None,
            },
        );

        let convo = store.get(1).unwrap();
        assert!(convo.online);
        assert_eq!(convo.last_active.as_deref(), Some("yesterday"));
    }

    #[test]
    fn unknown_peer_is_a_no_op() {
        let mut store = ConversationStore::new(Arc::new(MemoryStorage::new()));
        store.replace_all(vec![record(1, 5, None)]);
        let before = store.list().to_vec();

        let changed = apply_presence(
            &mut store,
            &PresenceUpdate {
                user_id: 6,
                online: true,
                last_active: None,
            },
        );

        assert_eq!(changed, 0);
        assert_eq!(store.list(), before.as_slice());
    }

    #[test]
    fn empty_store_is_a_no_op() {
        let mut store = ConversationStore::new(Arc::new(MemoryStorage::new()));
        let update = PresenceUpdate {
            user_id: 1,
            online: false,
            last_active: Some("now".to_string()),
        };
        assert_eq!(apply_presence(&mut store, &update), 0);
        assert!(store.is_empty());
    }
}

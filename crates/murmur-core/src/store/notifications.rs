//! Notification store

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{persist, rehydrate};
use crate::models::{NotificationId, NotificationRecord};
use crate::storage::StateStorage;

/// Storage key for the serialized notification list
pub const NOTIFICATION_STORAGE_KEY: &str = "notification-storage";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedNotifications {
    #[serde(default)]
    notifications: Vec<NotificationRecord>,
    #[serde(default)]
    unread_count: usize,
}

/// Most-recent-first list of notifications with a derived unread count.
pub struct NotificationStore {
    notifications: Vec<NotificationRecord>,
    unread_count: usize,
    storage: Arc<dyn StateStorage>,
}

impl std::fmt::Debug for NotificationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationStore")
            .field("notifications", &self.notifications)
            .field("unread_count", &self.unread_count)
            .finish_non_exhaustive()
    }
}

impl NotificationStore {
    pub fn new(storage: Arc<dyn StateStorage>) -> Self {
        let persisted: PersistedNotifications =
            rehydrate(storage.as_ref(), NOTIFICATION_STORAGE_KEY);
        let mut store = Self {
            notifications: persisted.notifications,
            unread_count: 0,
            storage,
        };
        store.recount();
        store
    }

    pub fn list(&self) -> &[NotificationRecord] {
        &self.notifications
    }

    pub fn get(&self, id: NotificationId) -> Option<&NotificationRecord> {
        self.notifications.iter().find(|n| n.id == id)
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    /// Number of entries with `is_read == false`
    pub const fn unread_count(&self) -> usize {
        self.unread_count
    }

    /// Replace the list with a REST snapshot.
    pub fn replace_all(&mut self, notifications: Vec<NotificationRecord>) {
        let mut seen = HashSet::with_capacity(notifications.len());
        self.notifications = notifications
            .into_iter()
            .filter(|n| seen.insert(n.id))
            .collect();
        self.commit();
    }

    /// Prepend a pushed notification. Returns `false` if the id is already
    /// present.
    pub fn add(&mut self, notification: NotificationRecord) -> bool {
        if self.get(notification.id).is_some() {
            tracing::debug!(notification_id = notification.id, "Ignoring duplicate notification");
            return false;
        }
        self.notifications.insert(0, notification);
        self.commit();
        true
    }

    /// Flip one notification to read. Returns `false` when nothing changed.
    pub fn mark_read(&mut self, id: NotificationId) -> bool {
        let Some(index) = self.notifications.iter().position(|n| n.id == id) else {
            tracing::warn!(notification_id = id, "Cannot mark notification read: not in store");
            return false;
        };
        if self.notifications[index].is_read {
            return false;
        }
        self.notifications[index] = NotificationRecord {
            is_read: true,
            ..self.notifications[index].clone()
        };
        self.commit();
        true
    }

    /// Flip every notification to read.
    pub fn mark_all_read(&mut self) {
        if self.unread_count == 0 {
            return;
        }
        self.notifications = self
            .notifications
            .iter()
            .map(|n| NotificationRecord {
                is_read: true,
                ..n.clone()
            })
            .collect();
        self.commit();
    }

    pub fn clear(&mut self) {
        self.notifications.clear();
        self.unread_count = 0;
        if let Err(error) = self.storage.remove(NOTIFICATION_STORAGE_KEY) {
            tracing::warn!("Failed to clear persisted notifications: {}", error);
        }
    }

    fn recount(&mut self) {
        self.unread_count = self.notifications.iter().filter(|n| !n.is_read).count();
    }

    fn commit(&mut self) {
        self.recount();
        persist(
            self.storage.as_ref(),
            NOTIFICATION_STORAGE_KEY,
            &PersistedNotificationsRef {
                notifications: &self.notifications,
                unread_count: self.unread_count,
            },
        );
    }
}

#[derive(Serialize)]
struct PersistedNotificationsRef<'a> {
    notifications: &'a [NotificationRecord],
    unread_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Actor, NotificationKind};
    use crate::storage::MemoryStorage;
    use pretty_assertions::assert_eq;

    fn notification(id: NotificationId, is_read: bool) -> NotificationRecord {
        NotificationRecord {
            id,
            kind: NotificationKind::Like,
            actor: Actor {
                username: "ana".to_string(),
                avatar: None,
                is_following: false,
            },
            content: "liked your post".to_string(),
            created_at: "2m".to_string(),
            is_read,
            link: None,
            post_image: None,
        }
    }

    fn store() -> NotificationStore {
        NotificationStore::new(Arc::new(MemoryStorage::new()))
    }

    fn ids(store: &NotificationStore) -> Vec<NotificationId> {
        store.list().iter().map(|n| n.id).collect()
    }

    #[test]
    fn add_prepends_and_skips_duplicates() {
        let mut store = store();
        store.replace_all(vec![notification(1, true)]);

        assert!(store.add(notification(2, false)));
        assert!(!store.add(notification(2, false)));

        assert_eq!(ids(&store), vec![2, 1]);
        assert_eq!(store.unread_count(), 1);
    }

    #[test]
    fn mark_read_and_mark_all_read_recount() {
        let mut store = store();
        store.replace_all(vec![
            notification(3, false),
            notification(2, false),
            notification(1, false),
        ]);
        assert_eq!(store.unread_count(), 3);

        assert!(store.mark_read(2));
        assert!(!store.mark_read(2));
        assert!(!store.mark_read(99));
        assert_eq!(store.unread_count(), 2);

        store.mark_all_read();
        assert_eq!(store.unread_count(), 0);
        assert!(store.list().iter().all(|n| n.is_read));
        assert_eq!(ids(&store), vec![3, 2, 1]);
    }

    #[test]
    fn replace_all_drops_duplicate_ids() {
        let mut store = store();
        store.replace_all(vec![notification(1, false), notification(1, true), notification(2, false)]);
        assert_eq!(ids(&store), vec![1, 2]);
        assert_eq!(store.unread_count(), 2);
    }

    #[test]
    fn rehydrates_and_recomputes_unread() {
        let storage: Arc<dyn StateStorage> = Arc::new(MemoryStorage::new());
        {
            let mut store = NotificationStore::new(Arc::clone(&storage));
            store.replace_all(vec![notification(1, false), notification(2, true)]);
        }
        let mut reloaded = NotificationStore::new(Arc::clone(&storage));
        assert_eq!(ids(&reloaded), vec![1, 2]);
        assert_eq!(reloaded.unread_count(), 1);

        reloaded.clear();
        assert!(NotificationStore::new(storage).is_empty());
    }

    #[test]
    fn corrupt_state_rehydrates_empty() {
        let storage: Arc<dyn StateStorage> = Arc::new(MemoryStorage::new());
        storage.save(NOTIFICATION_STORAGE_KEY, "[1,2").unwrap();
        let store = NotificationStore::new(storage);
        assert!(store.is_empty());
        assert_eq!(store.unread_count(), 0);
    }
}

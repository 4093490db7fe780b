//! Canonical client-side stores.
//!
//! Stores are plain owned values mutated through `&mut self`; the sync engine
//! owns them and applies every event on one logical thread. Each mutation is
//! a whole-record replace followed by a snapshot write to [`StateStorage`].

mod conversations;
mod notifications;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::storage::StateStorage;

pub use conversations::{
    ConversationStore, InboundOutcome, MarkReadOutcome, CONVERSATION_STORAGE_KEY,
    OWN_MESSAGE_PREFIX,
};
pub use notifications::{NotificationStore, NOTIFICATION_STORAGE_KEY};

/// Load a persisted snapshot, falling back to the default on any failure.
fn rehydrate<T: DeserializeOwned + Default>(storage: &dyn StateStorage, key: &str) -> T {
    match storage.load(key) {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|error| {
            tracing::warn!(key, "Discarding corrupt persisted state: {}", error);
            T::default()
        }),
        Ok(None) => T::default(),
        Err(error) => {
            tracing::warn!(key, "Failed to read persisted state: {}", error);
            T::default()
        }
    }
}

/// Write a snapshot; failures are logged and never propagated.
fn persist<T: Serialize>(storage: &dyn StateStorage, key: &str, value: &T) {
    let result = serde_json::to_string(value)
        .map_err(crate::Error::from)
        .and_then(|raw| storage.save(key, &raw));
    if let Err(error) = result {
        tracing::warn!(key, "Failed to persist state: {}", error);
    }
}

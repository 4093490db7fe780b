//! Named-key local state persistence.
//!
//! The stores serialize themselves after every mutation under a fixed key and
//! rehydrate from the same key on start.

mod migrations;
mod sqlite;

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};

pub use sqlite::SqliteStorage;

/// Durable key/value storage for serialized store snapshots.
pub trait StateStorage: Send + Sync {
    /// Load the raw value stored under `key`
    fn load(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    fn save(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the value stored under `key`
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-process storage; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|error| Error::Storage(error.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|error| Error::Storage(error.to_string()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .map_err(|error| Error::Storage(error.to_string()))?
            .remove(key);
        Ok(())
    }
}

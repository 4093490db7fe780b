//! murmur-core - Core library for Murmur
//!
//! This crate contains the real-time conversation and notification
//! synchronization layer used by Murmur clients: the persisted stores and
//! their merge rules, the push-channel supervisor, the read-receipt
//! reconciler and the backward-paging message history loader.

pub mod api;
pub mod auth;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod models;
pub mod presence;
pub mod read;
pub mod storage;
pub mod store;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use models::{ConversationRecord, MessageRecord, NotificationRecord, ThreadId, UserId};

//! Read-state reconciliation between the local store, the server and other
//! sessions.
//!
//! The reconciler never performs I/O. Each entry point mutates the
//! conversation store as needed and returns the follow-up [`ReadTask`]s for
//! the caller to run.

use std::time::Duration;

use crate::api::{ApiResult, MarkReadResponse};
use crate::events::ReadSignal;
use crate::models::{ConversationSnapshot, ThreadId};
use crate::store::{ConversationStore, MarkReadOutcome};

/// Delays used by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPolicy {
    /// Wait before re-fetching the conversation list after a mark-read that
    /// changed something on the server
    pub refresh_delay: Duration,
    /// Wait before repeating the mark-read call after a resume
    pub failsafe_delay: Duration,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            refresh_delay: Duration::from_millis(500),
            failsafe_delay: Duration::from_secs(3),
        }
    }
}

/// Follow-up work requested by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTask {
    /// Call the mark-read endpoint for `thread_id` once `after` has elapsed.
    MarkRead { thread_id: ThreadId, after: Duration },
    /// Re-fetch the conversation list once `after` has elapsed.
    RefreshConversations { after: Duration },
}

#[derive(Debug, Clone)]
pub struct ReadReconciler {
    policy: ReadPolicy,
    active: Option<ThreadId>,
}

impl ReadReconciler {
    pub const fn new(policy: ReadPolicy) -> Self {
        Self {
            policy,
            active: None,
        }
    }

    /// Thread currently open, if any.
    pub const fn active(&self) -> Option<ThreadId> {
        self.active
    }

    /// A thread was opened. It is marked read on the server right away.
    pub fn activate(&mut self, thread_id: ThreadId) -> Vec<ReadTask> {
        self.active = Some(thread_id);
        vec![ReadTask::MarkRead {
            thread_id,
            after: Duration::ZERO,
        }]
    }

    pub fn deactivate(&mut self) {
        self.active = None;
    }

    /// Process start or reload with a thread open: mark it read now and once
    /// more after the failsafe delay.
    pub fn on_resume(&self) -> Vec<ReadTask> {
        let Some(thread_id) = self.active else {
            return Vec::new();
        };
        vec![
            ReadTask::MarkRead {
                thread_id,
                after: Duration::ZERO,
            },
            ReadTask::MarkRead {
                thread_id,
                after: self.policy.failsafe_delay,
            },
        ]
    }

    /// The hosting view regained focus. The open thread is marked read now,
    /// covering messages that arrived while it was in the background.
    pub fn on_focus(&self) -> Vec<ReadTask> {
        self.active
            .map(|thread_id| ReadTask::MarkRead {
                thread_id,
                after: Duration::ZERO,
            })
            .into_iter()
            .collect()
    }

    /// A mark-read call finished.
    ///
    /// The thread is marked read locally whether or not the call succeeded.
    /// When the server reports that messages actually changed state, the
    /// conversation list is refreshed shortly after.
    pub fn on_mark_read_result(
        &self,
        store: &mut ConversationStore,
        thread_id: ThreadId,
        result: &ApiResult<MarkReadResponse>,
    ) -> Vec<ReadTask> {
        store.mark_read(thread_id);
        match result {
            Ok(response) if response.marked_read > 0 => {
                tracing::debug!(
                    thread_id,
                    marked_read = response.marked_read,
                    "Server marked messages read, scheduling refresh"
                );
                vec![ReadTask::RefreshConversations {
                    after: self.policy.refresh_delay,
                }]
            }
            Ok(_) => Vec::new(),
            Err(error) => {
                tracing::warn!(thread_id, "Mark-read failed, kept local read state: {}", error);
                Vec::new()
            }
        }
    }

    /// A read signal arrived on the conversations channel. Applied to the
    /// store directly; no REST call is made.
    pub fn on_signal(&self, store: &mut ConversationStore, signal: ReadSignal) -> MarkReadOutcome {
        match signal {
            ReadSignal::Update {
                chat_id,
                unread_count: Some(0),
            }
            | ReadSignal::Read { chat_id } => store.mark_read(chat_id),
            ReadSignal::Update {
                chat_id,
                unread_count,
            } => {
                tracing::debug!(
                    thread_id = chat_id,
                    unread_count,
                    "Ignoring read update with remaining unread messages"
                );
                MarkReadOutcome::AlreadyRead
            }
        }
    }

    /// Install a fresh conversation list. If the open thread still shows
    /// unread messages it is marked read again.
    pub fn on_snapshot(
        &self,
        store: &mut ConversationStore,
        snapshot: ConversationSnapshot,
    ) -> Vec<ReadTask> {
        store.apply_snapshot(snapshot);
        match self.active {
            Some(thread_id)
                if store
                    .get(thread_id)
                    .is_some_and(|conversation| conversation.unread_count > 0) =>
            {
                vec![ReadTask::MarkRead {
                    thread_id,
                    after: Duration::ZERO,
                }]
            }
            _ => Vec::new(),
        }
    }
}

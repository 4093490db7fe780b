//! Push channels.
//!
//! Each channel is one WebSocket owned by a supervisor task. The supervisor
//! opens it with a fresh credential, decodes inbound frames into typed events
//! and reopens it after an abnormal close. Callers only see a
//! [`SupervisorHandle`] for commands and a receiver of [`SupervisorEvent`]s.

mod supervisor;
mod transport;

use std::fmt;
use std::time::Duration;

use crate::models::ThreadId;

pub use supervisor::{spawn_supervisor, SupervisorHandle};
pub use transport::{Connector, Frame, Socket, TransportError, WsConnector, WsSocket};

/// Close code for a deliberate, client- or server-initiated shutdown.
pub const NORMAL_CLOSE: u16 = 1000;
/// Close code reported when a connection drops without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

/// Which push channel a supervisor owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Chat(ThreadId),
    Conversations,
    Notifications,
}

impl ChannelKind {
    /// Path below the socket base URL.
    pub fn path(&self) -> String {
        match self {
            Self::Chat(thread_id) => format!("ws/chat/{thread_id}/"),
            Self::Conversations => "ws/conversations/".to_string(),
            Self::Notifications => "ws/notifications/".to_string(),
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Chat(_) => "chat",
            Self::Conversations => "conversations",
            Self::Notifications => "notifications",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat(thread_id) => write!(f, "chat:{thread_id}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Full socket URL with the bearer credential as the `token` query parameter.
pub fn channel_url(ws_base_url: &str, kind: ChannelKind, token: &str) -> String {
    format!(
        "{}/{}?token={}",
        ws_base_url.trim_end_matches('/'),
        kind.path(),
        urlencoding::encode(token)
    )
}

/// Observable lifecycle of a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    /// Disconnected with a reconnect timer pending
    Reconnecting,
}

impl ConnectionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delay before reopening a channel after an abnormal close or a failed
/// open. The same fixed delay applies to every channel and every failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// Deadline for fetching the credential and completing the handshake
    pub open_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            open_timeout: Duration::from_secs(10),
        }
    }
}

/// What a supervisor reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent<E> {
    State(ConnectionState),
    Event(E),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn urls_embed_encoded_token() {
        assert_eq!(
            channel_url("wss://example.com/", ChannelKind::Chat(42), "a.b+c/d"),
            "wss://example.com/ws/chat/42/?token=a.b%2Bc%2Fd"
        );
        assert_eq!(
            channel_url("ws://localhost:8000", ChannelKind::Conversations, "t"),
            "ws://localhost:8000/ws/conversations/?token=t"
        );
        assert_eq!(
            channel_url("ws://localhost:8000", ChannelKind::Notifications, "t"),
            "ws://localhost:8000/ws/notifications/?token=t"
        );
    }

    #[test]
    fn kind_display() {
        assert_eq!(ChannelKind::Chat(7).to_string(), "chat:7");
        assert_eq!(ChannelKind::Notifications.to_string(), "notifications");
    }
}

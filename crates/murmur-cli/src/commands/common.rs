use std::path::{Path, PathBuf};
use std::sync::Arc;

use murmur_core::api::RestClient;
use murmur_core::auth::{AuthClient, CredentialProvider, TokenManager};
use murmur_core::config::ClientConfig;
use murmur_core::models::NotificationKind;
use murmur_core::storage::{SqliteStorage, StateStorage};
use murmur_core::{ConversationRecord, MessageRecord, NotificationRecord};

use crate::config::{load_client_config, resolve_state_path};
use crate::error::CliError;
use crate::session_store::KeyringSessionStore;

pub type Credentials = TokenManager<KeyringSessionStore>;

const PREVIEW_CHARS: usize = 60;

/// Everything a command needs: resolved config, credentials and where local
/// state lives.
pub struct Context {
    pub config: ClientConfig,
    pub api_url: String,
    pub credentials: Arc<Credentials>,
    pub state_path: PathBuf,
}

impl Context {
    pub fn new(config_path: Option<&Path>, state_path: Option<PathBuf>) -> Result<Self, CliError> {
        let config = load_client_config(config_path)?;
        let api_url = config.api_base_url()?;
        let client = AuthClient::new(&api_url, KeyringSessionStore::for_api(&api_url))?;
        let credentials = Arc::new(TokenManager::new(client, config.token_refresh_lead()));
        Ok(Self {
            config,
            api_url,
            credentials,
            state_path: resolve_state_path(state_path),
        })
    }

    /// Restore the stored session, failing when there is none.
    pub async fn require_session(&self) -> Result<(), CliError> {
        self.credentials.restore().await?;
        if self.credentials.is_authenticated() {
            Ok(())
        } else {
            Err(CliError::NotSignedIn)
        }
    }

    pub fn rest_client(&self) -> Result<RestClient<Credentials>, CliError> {
        Ok(RestClient::new(&self.api_url, Arc::clone(&self.credentials))?)
    }

    pub fn open_storage(&self) -> Result<Arc<dyn StateStorage>, CliError> {
        Ok(Arc::new(SqliteStorage::open(&self.state_path)?))
    }
}

/// First line of `text`, cut to `max_chars`.
pub fn preview(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or_default().trim();
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(max_chars.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

pub fn format_conversation_line(conversation: &ConversationRecord) -> String {
    let presence = if conversation.online { '*' } else { ' ' };
    let unread = match conversation.unread_count {
        0 => String::new(),
        count => format!(" ({count} unread)"),
    };
    format!(
        "{:>6} {presence} {}{unread}  {}  {}",
        conversation.id,
        conversation.peer_username,
        preview(&conversation.last_message, PREVIEW_CHARS),
        conversation.last_message_time,
    )
}

pub const fn notification_kind_label(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::Follow => "follow",
        NotificationKind::Like => "like",
        NotificationKind::Comment => "comment",
        NotificationKind::Mention => "mention",
        NotificationKind::Other => "other",
    }
}

pub fn format_notification_line(notification: &NotificationRecord) -> String {
    let marker = if notification.is_read { ' ' } else { '*' };
    format!(
        "{:>6} {marker} [{}] {}: {}  {}",
        notification.id,
        notification_kind_label(notification.kind),
        notification.actor.username,
        preview(&notification.content, PREVIEW_CHARS),
        notification.created_at,
    )
}

pub fn format_message_line(message: &MessageRecord) -> String {
    let author = if message.is_own {
        "you"
    } else {
        message.sender.as_deref().unwrap_or("them")
    };
    let receipt = if message.is_own && !message.read_by.is_empty() {
        " (read)"
    } else {
        ""
    };
    format!("{}  {author}: {}{receipt}", message.sent_at, message.text)
}

use std::sync::Arc;

use murmur_core::channel::WsConnector;
use murmur_core::engine::{EngineHandle, EngineUpdate, LogAlerts, SyncEngine};
use murmur_core::ThreadId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::commands::common::{format_message_line, Context};
use crate::error::CliError;

/// A line typed while watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Send(String),
    Open(ThreadId),
    Close,
    Older,
    Refresh,
    ReadNotification(i64),
    ReadAllNotifications,
    Quit,
}

/// Lines starting with `/` are commands; anything else is a message for
/// the open thread.
pub fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Some(Input::Send(line.to_string()));
    };

    let mut parts = command.split_whitespace();
    let input = match (parts.next()?, parts.next()) {
        ("open", Some(id)) => Input::Open(id.parse().ok()?),
        ("close", None) => Input::Close,
        ("older", None) => Input::Older,
        ("refresh", None) => Input::Refresh,
        ("read", Some("all")) => Input::ReadAllNotifications,
        ("read", Some(id)) => Input::ReadNotification(id.parse().ok()?),
        ("quit" | "exit", None) => Input::Quit,
        _ => return None,
    };
    Some(input)
}

/// One line of output for an engine update, or `None` for updates that are
/// not worth printing.
pub fn describe_update(update: &EngineUpdate) -> Option<String> {
    match update {
        EngineUpdate::ChannelState { channel, state } => Some(format!("[{channel}] {state}")),
        EngineUpdate::ConversationsChanged => None,
        EngineUpdate::NotificationsChanged { unread } => {
            Some(format!("[notifications] {unread} unread"))
        }
        EngineUpdate::ThreadLoaded {
            thread_id,
            messages,
            has_more,
        } => Some(format!(
            "[chat:{thread_id}] loaded {messages} messages{}",
            if *has_more { ", /older for more" } else { "" }
        )),
        EngineUpdate::MessageAppended { thread_id, message } => {
            Some(format!("[chat:{thread_id}] {}", format_message_line(message)))
        }
        EngineUpdate::OlderMessagesLoaded {
            thread_id, added, ..
        } => Some(format!("[chat:{thread_id}] loaded {added} older messages")),
        EngineUpdate::ReadReceipt {
            thread_id,
            message_id,
            ..
        } => Some(format!("[chat:{thread_id}] read up to {message_id}")),
        EngineUpdate::ThreadClosed { thread_id } => Some(format!("[chat:{thread_id}] closed")),
        EngineUpdate::LoggedOut => Some("Signed out".to_string()),
    }
}

fn apply_input(handle: &EngineHandle, input: Input) -> bool {
    match input {
        Input::Send(text) => handle.send_message(text),
        Input::Open(thread_id) => handle.open_thread(thread_id),
        Input::Close => handle.close_thread(),
        Input::Older => handle.load_older(),
        Input::Refresh => handle.refresh(),
        Input::ReadNotification(id) => handle.mark_notification_read(id),
        Input::ReadAllNotifications => handle.mark_all_notifications_read(),
        Input::Quit => return false,
    }
    true
}

pub async fn run_watch(ctx: &Context, thread: Option<ThreadId>) -> Result<(), CliError> {
    ctx.require_session().await?;

    let engine = SyncEngine::new(
        ctx.config.engine_config()?,
        Arc::new(ctx.rest_client()?),
        Arc::new(WsConnector),
        Arc::clone(&ctx.credentials),
        ctx.open_storage()?,
        Arc::new(LogAlerts),
    );
    let handle = engine.handle();
    let mut updates = handle.subscribe();
    let task = tokio::spawn(engine.run());

    if let Some(thread_id) = thread {
        handle.resume_thread(thread_id);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                break;
            }
            update = updates.recv() => match update {
                Ok(update) => {
                    if let Some(line) = describe_update(&update) {
                        println!("{line}");
                    }
                    if update == EngineUpdate::LoggedOut {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Output fell behind, skipped updates");
                }
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    if let Some(input) = parse_input(&line) {
                        if !apply_input(&handle, input) {
                            break;
                        }
                    }
                }
                None => stdin_open = false,
            },
        }
    }

    handle.shutdown();
    let engine = task.await?;
    println!(
        "{} conversations ({} unread), {} unread notifications",
        engine.conversations().len(),
        engine.conversations().total_unread(),
        engine.notifications().unread_count()
    );
    Ok(())
}

//! The sync engine.
//!
//! `SyncEngine` owns both stores and applies every event to them from a
//! single task, one event at a time: supervisor events, results of spawned
//! REST calls and timers, and commands sent through an [`EngineHandle`].
//! Anything that suspends runs in a spawned task and reports back as a
//! message, so no store mutation ever straddles an await.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use crate::api::{ApiResult, ChatApi, MarkReadResponse};
use crate::auth::CredentialProvider;
use crate::channel::{
    spawn_supervisor, ChannelKind, ConnectionState, Connector, ReconnectPolicy, SupervisorEvent,
    SupervisorHandle,
};
use crate::events::{
    decode_chat_frame, decode_conversations_frame, decode_notification_frame, ChatCommand,
    ChatEvent, ConversationUpdate, ConversationsEvent,
};
use crate::history::{fetch_initial, HistoryLoader, InitialHistory, ScrollAnchor};
use crate::models::{
    ConversationSnapshot, MessagePage, MessageRecord, NotificationId, NotificationRecord, ThreadId,
    UserId,
};
use crate::presence::apply_presence;
use crate::read::{ReadPolicy, ReadReconciler, ReadTask};
use crate::storage::StateStorage;
use crate::store::{ConversationStore, MarkReadOutcome, NotificationStore};

const UPDATE_BUFFER: usize = 256;

/// Engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub ws_base_url: String,
    pub page_size: usize,
    pub reconnect: ReconnectPolicy,
    pub read: ReadPolicy,
    pub scroll: ScrollAnchor,
}

/// Fire-and-forget user alerts (sound, desktop notification).
pub trait AlertSink: Send + Sync + 'static {
    /// A message from someone else landed in a conversation that is not open.
    fn message_received(&self, update: &ConversationUpdate);

    /// A new notification arrived.
    fn notification_received(&self, notification: &NotificationRecord);
}

/// Alert sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlerts;

impl AlertSink for LogAlerts {
    fn message_received(&self, update: &ConversationUpdate) {
        tracing::info!(
            thread_id = update.chat_id,
            from = %update.sender.username,
            "New message"
        );
    }

    fn notification_received(&self, notification: &NotificationRecord) {
        tracing::info!(
            notification_id = notification.id,
            from = %notification.actor.username,
            "New notification"
        );
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    OpenThread(ThreadId),
    /// Open a thread that was already open before a restart or reload
    ResumeThread(ThreadId),
    CloseThread,
    SendMessage(String),
    LoadOlder,
    /// Scroll position of the open thread's list, in pixels from the top
    Scrolled(f64),
    PageVisible,
    Refresh,
    MarkNotificationRead(NotificationId),
    MarkAllNotificationsRead,
    Logout,
    Shutdown,
}

/// What the engine applied, for views to re-render from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineUpdate {
    ChannelState {
        channel: ChannelKind,
        state: ConnectionState,
    },
    ConversationsChanged,
    NotificationsChanged {
        unread: usize,
    },
    ThreadLoaded {
        thread_id: ThreadId,
        messages: usize,
        has_more: bool,
    },
    MessageAppended {
        thread_id: ThreadId,
        message: MessageRecord,
    },
    OlderMessagesLoaded {
        thread_id: ThreadId,
        added: usize,
        has_more: bool,
    },
    ReadReceipt {
        thread_id: ThreadId,
        message_id: String,
        reader_id: UserId,
    },
    ThreadClosed {
        thread_id: ThreadId,
    },
    LoggedOut,
}

/// Command side of a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
    updates: broadcast::Sender<EngineUpdate>,
}

impl EngineHandle {
    pub fn open_thread(&self, thread_id: ThreadId) {
        self.send(EngineCommand::OpenThread(thread_id));
    }

    pub fn resume_thread(&self, thread_id: ThreadId) {
        self.send(EngineCommand::ResumeThread(thread_id));
    }

    pub fn close_thread(&self) {
        self.send(EngineCommand::CloseThread);
    }

    pub fn send_message(&self, text: impl Into<String>) {
        self.send(EngineCommand::SendMessage(text.into()));
    }

    pub fn load_older(&self) {
        self.send(EngineCommand::LoadOlder);
    }

    pub fn scrolled(&self, scroll_top: f64) {
        self.send(EngineCommand::Scrolled(scroll_top));
    }

    pub fn page_visible(&self) {
        self.send(EngineCommand::PageVisible);
    }

    pub fn refresh(&self) {
        self.send(EngineCommand::Refresh);
    }

    pub fn mark_notification_read(&self, id: NotificationId) {
        self.send(EngineCommand::MarkNotificationRead(id));
    }

    pub fn mark_all_notifications_read(&self) {
        self.send(EngineCommand::MarkAllNotificationsRead);
    }

    pub fn logout(&self) {
        self.send(EngineCommand::Logout);
    }

    pub fn shutdown(&self) {
        self.send(EngineCommand::Shutdown);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineUpdate> {
        self.updates.subscribe()
    }

    pub fn send(&self, command: EngineCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Sync engine already stopped");
        }
    }
}

enum TaskResult {
    Conversations(ApiResult<ConversationSnapshot>),
    Notifications(ApiResult<Vec<NotificationRecord>>),
    MarkRead {
        thread_id: ThreadId,
        result: ApiResult<MarkReadResponse>,
    },
    InitialHistory {
        thread_id: ThreadId,
        result: ApiResult<InitialHistory>,
    },
    OlderPage {
        thread_id: ThreadId,
        offset: usize,
        result: ApiResult<MessagePage>,
    },
    NotificationCall {
        action: &'static str,
        result: ApiResult<()>,
    },
}

struct Channel<E> {
    handle: SupervisorHandle,
    events: mpsc::UnboundedReceiver<SupervisorEvent<E>>,
}

struct OpenThread {
    channel: Channel<ChatEvent>,
    history: HistoryLoader,
}

pub struct SyncEngine<A: ChatApi, C: Connector, P: CredentialProvider> {
    config: EngineConfig,
    api: Arc<A>,
    connector: Arc<C>,
    credentials: Arc<P>,
    alerts: Arc<dyn AlertSink>,
    conversations: ConversationStore,
    notifications: NotificationStore,
    reader: ReadReconciler,
    conversations_channel: Option<Channel<ConversationsEvent>>,
    notifications_channel: Option<Channel<NotificationRecord>>,
    thread: Option<OpenThread>,
    command_tx: mpsc::UnboundedSender<EngineCommand>,
    commands: mpsc::UnboundedReceiver<EngineCommand>,
    task_tx: mpsc::UnboundedSender<TaskResult>,
    tasks: mpsc::UnboundedReceiver<TaskResult>,
    updates: broadcast::Sender<EngineUpdate>,
}

impl<A: ChatApi, C: Connector, P: CredentialProvider> SyncEngine<A, C, P> {
    /// Build an engine. Stores are rehydrated from `storage` immediately;
    /// nothing touches the network until [`SyncEngine::run`].
    pub fn new(
        config: EngineConfig,
        api: Arc<A>,
        connector: Arc<C>,
        credentials: Arc<P>,
        storage: Arc<dyn StateStorage>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (task_tx, tasks) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        Self {
            reader: ReadReconciler::new(config.read),
            config,
            api,
            connector,
            credentials,
            alerts,
            conversations: ConversationStore::new(Arc::clone(&storage)),
            notifications: NotificationStore::new(storage),
            conversations_channel: None,
            notifications_channel: None,
            thread: None,
            command_tx,
            commands,
            task_tx,
            tasks,
            updates,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            commands: self.command_tx.clone(),
            updates: self.updates.clone(),
        }
    }

    pub const fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub const fn notifications(&self) -> &NotificationStore {
        &self.notifications
    }

    /// History of the open thread
    pub fn thread(&self) -> Option<&HistoryLoader> {
        self.thread.as_ref().map(|thread| &thread.history)
    }

    pub const fn reader(&self) -> &ReadReconciler {
        &self.reader
    }

    /// Process events until [`EngineCommand::Shutdown`], then hand the
    /// engine back so its final state can be inspected.
    pub async fn run(mut self) -> Self {
        self.start();
        loop {
            tokio::select! {
                Some(command) = self.commands.recv() => {
                    if command == EngineCommand::Shutdown {
                        self.stop();
                        break;
                    }
                    self.on_command(command).await;
                }
                Some(result) = self.tasks.recv() => self.on_task(result),
                event = next_channel_event(&mut self.conversations_channel) => {
                    self.on_conversations_event(event);
                }
                event = next_channel_event(&mut self.notifications_channel) => {
                    self.on_notifications_event(event);
                }
                event = next_thread_event(&mut self.thread) => self.on_thread_event(event),
            }
        }
        tracing::debug!("Sync engine stopped");
        self
    }

    fn start(&mut self) {
        let conversations = self.spawn_channel(ChannelKind::Conversations, decode_conversations_frame);
        let notifications = self.spawn_channel(ChannelKind::Notifications, decode_notification_frame);
        conversations.handle.connect();
        notifications.handle.connect();
        self.conversations_channel = Some(conversations);
        self.notifications_channel = Some(notifications);
        self.refresh();
    }

    /// Stop every channel. Stores and the open thread's history are kept.
    fn stop(&self) {
        for handle in self.channel_handles() {
            handle.shutdown();
        }
    }

    fn spawn_channel<E: Send + 'static>(
        &self,
        kind: ChannelKind,
        decode: fn(&str) -> Result<E, crate::events::EventError>,
    ) -> Channel<E> {
        let (handle, events) = spawn_supervisor(
            kind,
            self.config.ws_base_url.clone(),
            Arc::clone(&self.connector),
            Arc::clone(&self.credentials),
            self.config.reconnect,
            decode,
        );
        Channel { handle, events }
    }

    fn channel_handles(&self) -> Vec<SupervisorHandle> {
        [
            self.conversations_channel.as_ref().map(|c| c.handle.clone()),
            self.notifications_channel.as_ref().map(|c| c.handle.clone()),
            self.thread.as_ref().map(|t| t.channel.handle.clone()),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    async fn on_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::OpenThread(thread_id) => self.open_thread(thread_id, false),
            EngineCommand::ResumeThread(thread_id) => self.open_thread(thread_id, true),
            EngineCommand::CloseThread => self.close_thread(),
            EngineCommand::SendMessage(text) => self.send_message(text),
            EngineCommand::LoadOlder => self.load_older(),
            EngineCommand::Scrolled(scroll_top) => {
                let has_more = self
                    .thread
                    .as_ref()
                    .is_some_and(|thread| thread.history.has_more());
                if self.config.scroll.should_load(scroll_top, has_more) {
                    self.load_older();
                }
            }
            EngineCommand::PageVisible => {
                for handle in self.channel_handles() {
                    handle.page_visible();
                }
                if let Some(thread) = &self.thread {
                    thread.channel.handle.send(ChatCommand::MarkRead.encode());
                }
                let tasks = self.reader.on_focus();
                self.run_read_tasks(tasks);
                self.load_initial();
            }
            EngineCommand::Refresh => {
                self.refresh();
                self.load_initial();
            }
            EngineCommand::MarkNotificationRead(id) => {
                if self.notifications.mark_read(id) {
                    self.notifications_changed();
                }
                let api = Arc::clone(&self.api);
                self.spawn_task(Duration::ZERO, async move {
                    TaskResult::NotificationCall {
                        action: "mark notification read",
                        result: api.mark_notification_read(id).await,
                    }
                });
            }
            EngineCommand::MarkAllNotificationsRead => {
                self.notifications.mark_all_read();
                self.notifications_changed();
                let api = Arc::clone(&self.api);
                self.spawn_task(Duration::ZERO, async move {
                    TaskResult::NotificationCall {
                        action: "mark all notifications read",
                        result: api.mark_all_notifications_read().await,
                    }
                });
            }
            EngineCommand::Logout => self.logout().await,
            EngineCommand::Shutdown => self.stop(),
        }
    }

    fn open_thread(&mut self, thread_id: ThreadId, resumed: bool) {
        if self.thread.as_ref().map(|t| t.history.thread_id()) == Some(thread_id) {
            tracing::debug!(thread_id, "Thread already open");
            return;
        }
        self.close_thread();

        let channel = self.spawn_channel(ChannelKind::Chat(thread_id), decode_chat_frame);
        channel.handle.connect();
        self.thread = Some(OpenThread {
            channel,
            history: HistoryLoader::new(thread_id, self.config.page_size),
        });

        self.load_initial();

        let opened = self.reader.activate(thread_id);
        let tasks = if resumed { self.reader.on_resume() } else { opened };
        self.run_read_tasks(tasks);
    }

    /// Fetch the open thread's latest page unless it is loaded or already
    /// being fetched.
    fn load_initial(&mut self) {
        let Some(thread) = self.thread.as_mut() else {
            return;
        };
        if !thread.history.claim_initial() {
            return;
        }
        let thread_id = thread.history.thread_id();
        let page_size = thread.history.page_size();
        let api = Arc::clone(&self.api);
        self.spawn_task(Duration::ZERO, async move {
            TaskResult::InitialHistory {
                thread_id,
                result: fetch_initial(api.as_ref(), thread_id, page_size).await,
            }
        });
    }

    fn close_thread(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        thread.channel.handle.shutdown();
        self.reader.deactivate();
        self.emit(EngineUpdate::ThreadClosed {
            thread_id: thread.history.thread_id(),
        });
    }

    fn send_message(&self, text: String) {
        if text.trim().is_empty() {
            return;
        }
        match &self.thread {
            Some(thread) => thread.channel.handle.send(ChatCommand::Text(text).encode()),
            None => tracing::warn!("Cannot send message: no thread is open"),
        }
    }

    fn load_older(&mut self) {
        let Some(thread) = self.thread.as_mut() else {
            return;
        };
        if !thread.history.is_loaded() {
            self.load_initial();
            return;
        }
        let Some(offset) = thread.history.next_page_request() else {
            return;
        };
        let thread_id = thread.history.thread_id();
        let page_size = thread.history.page_size();
        let api = Arc::clone(&self.api);
        self.spawn_task(Duration::ZERO, async move {
            TaskResult::OlderPage {
                thread_id,
                offset,
                result: api.fetch_messages(thread_id, offset, page_size).await,
            }
        });
    }

    fn refresh(&self) {
        if !self.credentials.is_authenticated() {
            tracing::debug!("Not authenticated, skipping refresh");
            return;
        }
        self.spawn_conversations_fetch(Duration::ZERO);
        let api = Arc::clone(&self.api);
        self.spawn_task(Duration::ZERO, async move {
            TaskResult::Notifications(api.fetch_notifications().await)
        });
    }

    async fn logout(&mut self) {
        self.close_thread();
        for handle in self.channel_handles() {
            handle.disconnect();
        }
        self.conversations.clear();
        self.notifications.clear();
        self.emit(EngineUpdate::ConversationsChanged);
        self.notifications_changed();
        if let Err(error) = self.credentials.sign_out().await {
            tracing::warn!("Failed to clear session: {}", error);
        }
        tracing::info!("Logged out");
        self.emit(EngineUpdate::LoggedOut);
    }

    fn on_task(&mut self, result: TaskResult) {
        if !self.credentials.is_authenticated() {
            tracing::debug!("Discarding task result after logout");
            return;
        }
        match result {
            TaskResult::Conversations(Ok(snapshot)) => {
                let tasks = self.reader.on_snapshot(&mut self.conversations, snapshot);
                self.emit(EngineUpdate::ConversationsChanged);
                self.run_read_tasks(tasks);
            }
            TaskResult::Conversations(Err(error)) => {
                tracing::warn!("Failed to fetch conversations: {}", error);
            }
            TaskResult::Notifications(Ok(notifications)) => {
                self.notifications.replace_all(notifications);
                self.notifications_changed();
            }
            TaskResult::Notifications(Err(error)) => {
                tracing::warn!("Failed to fetch notifications: {}", error);
            }
            TaskResult::MarkRead { thread_id, result } => {
                let tasks = self
                    .reader
                    .on_mark_read_result(&mut self.conversations, thread_id, &result);
                self.emit(EngineUpdate::ConversationsChanged);
                self.run_read_tasks(tasks);
            }
            TaskResult::InitialHistory { thread_id, result } => {
                self.on_initial_history(thread_id, result);
            }
            TaskResult::OlderPage {
                thread_id,
                offset,
                result,
            } => self.on_older_page(thread_id, offset, result),
            TaskResult::NotificationCall { action, result } => {
                if let Err(error) = result {
                    tracing::warn!("Failed to {}: {}", action, error);
                }
            }
        }
    }

    fn on_initial_history(&mut self, thread_id: ThreadId, result: ApiResult<InitialHistory>) {
        let Some(thread) = self.open_history(thread_id) else {
            tracing::debug!(thread_id, "Discarding history for a thread that is no longer open");
            return;
        };
        match result {
            Ok(initial) => {
                thread.apply_initial(initial);
                let update = EngineUpdate::ThreadLoaded {
                    thread_id,
                    messages: thread.messages().len(),
                    has_more: thread.has_more(),
                };
                self.emit(update);
            }
            Err(error) => {
                thread.fail_initial();
                tracing::warn!(thread_id, "Failed to load thread history: {}", error);
            }
        }
    }

    fn on_older_page(&mut self, thread_id: ThreadId, offset: usize, result: ApiResult<MessagePage>) {
        let Some(thread) = self
            .open_history(thread_id)
            .filter(|history| history.is_loading_older())
        else {
            tracing::debug!(thread_id, offset, "Discarding stale history page");
            return;
        };
        match result {
            Ok(page) => {
                let added = thread.apply_older_page(offset, page);
                let update = EngineUpdate::OlderMessagesLoaded {
                    thread_id,
                    added,
                    has_more: thread.has_more(),
                };
                self.emit(update);
            }
            Err(error) => {
                thread.fail_older_page();
                tracing::warn!(thread_id, offset, "Failed to load older messages: {}", error);
            }
        }
    }

    fn open_history(&mut self, thread_id: ThreadId) -> Option<&mut HistoryLoader> {
        self.thread
            .as_mut()
            .map(|thread| &mut thread.history)
            .filter(|history| history.thread_id() == thread_id)
    }

    fn on_conversations_event(&mut self, event: SupervisorEvent<ConversationsEvent>) {
        match event {
            SupervisorEvent::State(state) => self.emit(EngineUpdate::ChannelState {
                channel: ChannelKind::Conversations,
                state,
            }),
            SupervisorEvent::Event(ConversationsEvent::Update(update)) => {
                self.conversations.apply_inbound_message(&update);
                if !update.is_sender && self.reader.active() != Some(update.chat_id) {
                    self.alerts.message_received(&update);
                }
                self.emit(EngineUpdate::ConversationsChanged);
            }
            SupervisorEvent::Event(ConversationsEvent::Read(signal)) => {
                if self.reader.on_signal(&mut self.conversations, signal) == MarkReadOutcome::Cleared {
                    self.emit(EngineUpdate::ConversationsChanged);
                }
            }
            SupervisorEvent::Event(ConversationsEvent::Presence(presence)) => {
                if apply_presence(&mut self.conversations, &presence) > 0 {
                    self.emit(EngineUpdate::ConversationsChanged);
                }
            }
        }
    }

    fn on_notifications_event(&mut self, event: SupervisorEvent<NotificationRecord>) {
        match event {
            SupervisorEvent::State(state) => self.emit(EngineUpdate::ChannelState {
                channel: ChannelKind::Notifications,
                state,
            }),
            SupervisorEvent::Event(notification) => {
                let alert = notification.clone();
                if self.notifications.add(notification) {
                    self.alerts.notification_received(&alert);
                    self.notifications_changed();
                }
            }
        }
    }

    fn on_thread_event(&mut self, (thread_id, event): (ThreadId, SupervisorEvent<ChatEvent>)) {
        let Some(thread) = self.thread.as_mut() else {
            return;
        };
        match event {
            SupervisorEvent::State(state) => {
                if state == ConnectionState::Connected {
                    thread.channel.handle.send(ChatCommand::MarkRead.encode());
                }
                self.emit(EngineUpdate::ChannelState {
                    channel: ChannelKind::Chat(thread_id),
                    state,
                });
            }
            SupervisorEvent::Event(ChatEvent::Message(message)) => {
                let from_peer = !message.is_own;
                if !thread.history.push_live(message.clone()) {
                    return;
                }
                if from_peer {
                    thread.channel.handle.send(ChatCommand::MarkRead.encode());
                }
                self.emit(EngineUpdate::MessageAppended { thread_id, message });
            }
            SupervisorEvent::Event(ChatEvent::ReadReceipt {
                message_id,
                reader_id,
            }) => {
                if thread.history.apply_read_receipt(&message_id, reader_id) > 0 {
                    self.emit(EngineUpdate::ReadReceipt {
                        thread_id,
                        message_id,
                        reader_id,
                    });
                }
            }
        }
    }

    fn run_read_tasks(&self, tasks: Vec<ReadTask>) {
        for task in tasks {
            match task {
                ReadTask::MarkRead { thread_id, after } => {
                    let api = Arc::clone(&self.api);
                    self.spawn_task(after, async move {
                        TaskResult::MarkRead {
                            thread_id,
                            result: api.mark_thread_read(thread_id).await,
                        }
                    });
                }
                ReadTask::RefreshConversations { after } => self.spawn_conversations_fetch(after),
            }
        }
    }

    fn spawn_conversations_fetch(&self, after: Duration) {
        let api = Arc::clone(&self.api);
        self.spawn_task(after, async move {
            TaskResult::Conversations(api.fetch_conversations().await)
        });
    }

    fn spawn_task<F>(&self, after: Duration, work: F)
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        let results = self.task_tx.clone();
        tokio::spawn(async move {
            if !after.is_zero() {
                tokio::time::sleep(after).await;
            }
            if results.send(work.await).is_err() {
                tracing::debug!("Sync engine stopped before task finished");
            }
        });
    }

    fn notifications_changed(&self) {
        self.emit(EngineUpdate::NotificationsChanged {
            unread: self.notifications.unread_count(),
        });
    }

    fn emit(&self, update: EngineUpdate) {
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }
}

async fn next_channel_event<E>(channel: &mut Option<Channel<E>>) -> SupervisorEvent<E> {
    match channel {
        Some(channel) => match channel.events.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

async fn next_thread_event(thread: &mut Option<OpenThread>) -> (ThreadId, SupervisorEvent<ChatEvent>) {
    match thread {
        Some(thread) => {
            let thread_id = thread.history.thread_id();
            match thread.channel.events.recv().await {
                Some(event) => (thread_id, event),
                None => std::future::pending().await,
            }
        }
        None => std::future::pending().await,
    }
}

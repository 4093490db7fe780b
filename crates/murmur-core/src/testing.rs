//! In-process fakes for the network seams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::api::{ApiError, ApiResult, ChatApi, MarkReadResponse};
use crate::auth::{AuthError, AuthResult, CredentialProvider};
use crate::channel::{ConnectionState, Connector, Frame, Socket, SupervisorEvent, TransportError};
use crate::models::{
    ConversationRecord, ConversationSnapshot, MessagePage, MessageRecord, NotificationId,
    NotificationRecord, ThreadId,
};

/// Let every runnable task reach its next await point.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Next state transition reported by a supervisor, skipping events.
pub async fn next_state<E>(
    events: &mut mpsc::UnboundedReceiver<SupervisorEvent<E>>,
) -> ConnectionState {
    loop {
        match events.recv().await {
            Some(SupervisorEvent::State(state)) => return state,
            Some(SupervisorEvent::Event(_)) => {}
            None => panic!("supervisor stopped"),
        }
    }
}

/// Next decoded event reported by a supervisor, skipping state changes.
pub async fn next_event<E>(events: &mut mpsc::UnboundedReceiver<SupervisorEvent<E>>) -> E {
    loop {
        match events.recv().await {
            Some(SupervisorEvent::Event(event)) => return event,
            Some(SupervisorEvent::State(_)) => {}
            None => panic!("supervisor stopped"),
        }
    }
}

/// Local HTTP server answering every request with `status` and a JSON
/// error body. Returns its base URL.
pub async fn http_status_server(status: u16) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                read_request(&mut stream).await;
                let body = r#"{"detail": "unavailable"}"#;
                let response = format!(
                    "HTTP/1.1 {status} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    format!("http://{address}")
}

/// Read one request, headers and body, so the reply is not sent early.
async fn read_request(stream: &mut TcpStream) {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(read) => buffer.extend_from_slice(&chunk[..read]),
        }
        let Some(header_end) = buffer.windows(4).position(|window| window == b"\r\n\r\n") else {
            continue;
        };
        let headers = String::from_utf8_lossy(&buffer[..header_end]).to_ascii_lowercase();
        let body_len = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buffer.len() >= header_end + 4 + body_len {
            return;
        }
    }
}

pub struct FakeCredentials {
    authenticated: AtomicBool,
    token: String,
}

impl FakeCredentials {
    pub fn signed_in() -> Self {
        Self {
            authenticated: AtomicBool::new(true),
            token: "test-token".to_string(),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            authenticated: AtomicBool::new(false),
            token: String::new(),
        }
    }

    pub fn set_authenticated(&self, value: bool) {
        self.authenticated.store(value, Ordering::SeqCst);
    }
}

impl CredentialProvider for FakeCredentials {
    async fn access_token(&self) -> AuthResult<String> {
        if self.is_authenticated() {
            Ok(self.token.clone())
        } else {
            Err(AuthError::NotSignedIn)
        }
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        self.set_authenticated(false);
        Ok(())
    }
}

/// Server side of one fake socket.
#[derive(Clone)]
pub struct FakeRemote {
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    sent: Arc<Mutex<Vec<String>>>,
    closed_with: Arc<Mutex<Option<u16>>>,
}

impl FakeRemote {
    pub fn push_text(&self, text: &str) {
        self.to_client.send(Frame::Text(text.to_string())).unwrap();
    }

    pub fn close(&self, code: Option<u16>) {
        self.to_client.send(Frame::Close(code)).unwrap();
    }

    /// Every frame the client has sent so far.
    pub fn sent(&self) -> Vec<String> {
        let mut receiver = self.from_client.lock().unwrap();
        let mut sent = self.sent.lock().unwrap();
        while let Ok(text) = receiver.try_recv() {
            sent.push(text);
        }
        sent.clone()
    }

    /// Close code the client used, if it closed the socket.
    pub fn closed_with(&self) -> Option<u16> {
        *self.closed_with.lock().unwrap()
    }
}

pub struct FakeSocket {
    inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<String>,
    closed_with: Arc<Mutex<Option<u16>>>,
}

impl Socket for FakeSocket {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self, code: u16, _reason: &str) -> Result<(), TransportError> {
        *self.closed_with.lock().unwrap() = Some(code);
        Ok(())
    }
}

#[derive(Default)]
struct ConnectorState {
    attempts: usize,
    fail_next: usize,
    hang_next: usize,
    urls: Vec<String>,
    remotes: Vec<FakeRemote>,
}

/// Connector whose sockets are driven from the test through [`FakeRemote`].
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl FakeConnector {
    /// Make the next `count` opens fail.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().unwrap().fail_next = count;
    }

    /// Make the next `count` opens never complete.
    pub fn hang_next(&self, count: usize) {
        self.state.lock().unwrap().hang_next = count;
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    /// Sockets successfully opened so far.
    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().remotes.len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.state.lock().unwrap().urls.clone()
    }

    pub fn remote(&self, index: usize) -> FakeRemote {
        self.state.lock().unwrap().remotes[index].clone()
    }

    /// Most recent socket whose URL contains `fragment`.
    pub fn remote_for(&self, fragment: &str) -> FakeRemote {
        let state = self.state.lock().unwrap();
        let index = state
            .urls
            .iter()
            .rposition(|url| url.contains(fragment))
            .unwrap_or_else(|| panic!("no socket opened for {fragment}"));
        state.remotes[index].clone()
    }

    /// Sockets opened whose URL contains `fragment`.
    pub fn opened_for(&self, fragment: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .urls
            .iter()
            .filter(|url| url.contains(fragment))
            .count()
    }
}

impl FakeConnector {
    /// Count an open attempt; true when it should hang.
    fn begin_attempt(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        if state.hang_next > 0 {
            state.hang_next -= 1;
            return true;
        }
        false
    }
}

impl Connector for FakeConnector {
    type Socket = FakeSocket;

    async fn open(&self, url: &str) -> Result<FakeSocket, TransportError> {
        if self.begin_attempt() {
            return std::future::pending().await;
        }

        let mut state = self.state.lock().unwrap();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(TransportError::WebSocket("connection refused".to_string()));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let closed_with = Arc::new(Mutex::new(None));
        state.urls.push(url.to_string());
        state.remotes.push(FakeRemote {
            to_client,
            from_client: Arc::new(Mutex::new(from_client)),
            sent: Arc::new(Mutex::new(Vec::new())),
            closed_with: Arc::clone(&closed_with),
        });
        Ok(FakeSocket {
            inbound,
            outbound,
            closed_with,
        })
    }
}

/// Scripted REST backend.
#[derive(Default)]
pub struct FakeApi {
    conversations: Mutex<Vec<ConversationRecord>>,
    threads: Mutex<Vec<(ThreadId, Vec<MessageRecord>)>>,
    notifications: Mutex<Vec<NotificationRecord>>,
    mark_read_results: Mutex<VecDeque<ApiResult<MarkReadResponse>>>,
    fetch_delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<String>>,
    conversation_fetches: AtomicUsize,
}

impl FakeApi {
    pub fn set_conversations(&self, conversations: Vec<ConversationRecord>) {
        *self.conversations.lock().unwrap() = conversations;
    }

    pub fn set_thread(&self, thread_id: ThreadId, messages: Vec<MessageRecord>) {
        let mut threads = self.threads.lock().unwrap();
        threads.retain(|(id, _)| *id != thread_id);
        threads.push((thread_id, messages));
    }

    pub fn set_notifications(&self, notifications: Vec<NotificationRecord>) {
        *self.notifications.lock().unwrap() = notifications;
    }

    /// Queue the result of the next mark-read call. Unqueued calls report
    /// zero messages marked.
    pub fn push_mark_read(&self, result: ApiResult<MarkReadResponse>) {
        self.mark_read_results.lock().unwrap().push_back(result);
    }

    /// Delay every message page fetch.
    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap() = Some(delay);
    }

    /// Calls made so far, as `name:arg` strings.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_named(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    pub fn conversation_fetches(&self) -> usize {
        self.conversation_fetches.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ChatApi for FakeApi {
    async fn fetch_conversations(&self) -> ApiResult<ConversationSnapshot> {
        self.record("fetch_conversations".to_string());
        self.conversation_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(ConversationSnapshot {
            conversations: self.conversations.lock().unwrap().clone(),
            errors: Vec::new(),
        })
    }

    async fn fetch_messages(
        &self,
        thread_id: ThreadId,
        offset: usize,
        limit: usize,
    ) -> ApiResult<MessagePage> {
        self.record(format!("fetch_messages:{thread_id}:{offset}"));
        let delay = *self.fetch_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let threads = self.threads.lock().unwrap();
        let Some((_, messages)) = threads.iter().find(|(id, _)| *id == thread_id) else {
            return Err(ApiError::Api("Not found. (404)".to_string()));
        };
        let results = messages.iter().skip(offset).take(limit).cloned().collect();
        Ok(MessagePage {
            count: messages.len(),
            next: None,
            previous: None,
            results,
        })
    }

    async fn mark_thread_read(&self, thread_id: ThreadId) -> ApiResult<MarkReadResponse> {
        self.record(format!("mark_thread_read:{thread_id}"));
        self.mark_read_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(MarkReadResponse {
                    status: "success".to_string(),
                    thread_id: Some(thread_id),
                    ..MarkReadResponse::default()
                })
            })
    }

    async fn fetch_notifications(&self) -> ApiResult<Vec<NotificationRecord>> {
        self.record("fetch_notifications".to_string());
        Ok(self.notifications.lock().unwrap().clone())
    }

    async fn mark_all_notifications_read(&self) -> ApiResult<()> {
        self.record("mark_all_notifications_read".to_string());
        Ok(())
    }

    async fn mark_notification_read(&self, id: NotificationId) -> ApiResult<()> {
        self.record(format!("mark_notification_read:{id}"));
        Ok(())
    }
}

/// A message with a numeric id and text `m<id>`.
pub fn message(id: usize, is_own: bool) -> MessageRecord {
    MessageRecord {
        id: id.to_string(),
        text: format!("m{id}"),
        sent_at: format!("t{id:04}"),
        is_own,
        sender: None,
        sender_id: None,
        read_by: Vec::new(),
    }
}

pub fn messages(count: usize) -> Vec<MessageRecord> {
    (0..count).map(|id| message(id, id % 2 == 0)).collect()
}

pub fn conversation(id: ThreadId, peer_id: i64, unread_count: u32) -> ConversationRecord {
    ConversationRecord {
        id,
        peer_username: format!("peer{peer_id}"),
        peer_avatar: None,
        peer_id,
        last_message: String::new(),
        last_message_time: String::new(),
        unread_count,
        online: false,
        last_active: None,
    }
}

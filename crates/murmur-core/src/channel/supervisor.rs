//! Connection supervisor task.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout, Sleep};

use super::{
    channel_url, ChannelKind, ConnectionState, Connector, Frame, ReconnectPolicy, Socket,
    SupervisorEvent, TransportError, ABNORMAL_CLOSE, NORMAL_CLOSE,
};
use crate::auth::CredentialProvider;
use crate::events::EventError;

type OpenFuture<S> = Pin<Box<dyn Future<Output = Result<S, TransportError>> + Send>>;

/// Turns one text frame into a typed channel event.
pub type Decoder<E> = fn(&str) -> Result<E, EventError>;

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Send(String),
    Visible,
    Shutdown,
}

/// Command side of a running supervisor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    kind: ChannelKind,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl SupervisorHandle {
    pub const fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Open the channel unless it is already open or opening.
    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    /// Cancel any pending reconnect and close the socket. Safe to repeat.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Send one text frame. Dropped when the channel is not connected.
    pub fn send(&self, text: impl Into<String>) {
        self.command(Command::Send(text.into()));
    }

    /// The hosting view became visible again; reopen if the socket was lost.
    pub fn page_visible(&self) {
        self.command(Command::Visible);
    }

    /// Disconnect and stop the supervisor task.
    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!(channel = %self.kind, "Supervisor already stopped");
        }
    }
}

/// Start a supervisor task for `kind`.
///
/// The channel stays idle until [`SupervisorHandle::connect`] is called. The
/// task stops on [`SupervisorHandle::shutdown`] or once every handle is
/// dropped.
pub fn spawn_supervisor<C, P, E>(
    kind: ChannelKind,
    ws_base_url: String,
    connector: Arc<C>,
    credentials: Arc<P>,
    policy: ReconnectPolicy,
    decode: Decoder<E>,
) -> (SupervisorHandle, mpsc::UnboundedReceiver<SupervisorEvent<E>>)
where
    C: Connector,
    P: CredentialProvider,
    E: Send + 'static,
{
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

    let supervisor = Supervisor {
        kind,
        ws_base_url,
        connector,
        credentials,
        policy,
        decode,
        events: event_tx,
        state: state_tx,
        socket: None,
        opening: None,
        reconnect: None,
    };
    tokio::spawn(supervisor.run(command_rx));

    let handle = SupervisorHandle {
        kind,
        commands: command_tx,
        state: state_rx,
    };
    (handle, event_rx)
}

struct Supervisor<C: Connector, P, E> {
    kind: ChannelKind,
    ws_base_url: String,
    connector: Arc<C>,
    credentials: Arc<P>,
    policy: ReconnectPolicy,
    decode: Decoder<E>,
    events: mpsc::UnboundedSender<SupervisorEvent<E>>,
    state: watch::Sender<ConnectionState>,
    socket: Option<C::Socket>,
    opening: Option<OpenFuture<C::Socket>>,
    reconnect: Option<Pin<Box<Sleep>>>,
}

impl<C, P, E> Supervisor<C, P, E>
where
    C: Connector,
    P: CredentialProvider,
    E: Send + 'static,
{
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        self.disconnect().await;
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                },
                result = open_progress(&mut self.opening) => self.on_open_result(result),
                frame = next_frame(&mut self.socket) => self.on_frame(frame),
                () = reconnect_due(&mut self.reconnect) => {
                    self.reconnect = None;
                    tracing::debug!(channel = %self.kind, "Reconnect timer fired");
                    self.connect();
                }
            }
        }
        tracing::debug!(channel = %self.kind, "Supervisor stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect => self.disconnect().await,
            Command::Send(text) => self.send(text).await,
            Command::Visible => {
                if self.socket.is_none() && self.opening.is_none() {
                    tracing::info!(channel = %self.kind, "Channel lost while hidden, reconnecting");
                    self.connect();
                }
            }
            Command::Shutdown => self.disconnect().await,
        }
    }

    fn connect(&mut self) {
        if self.socket.is_some() || self.opening.is_some() {
            tracing::debug!(channel = %self.kind, "Channel already open or opening");
            return;
        }
        if !self.credentials.is_authenticated() {
            tracing::debug!(channel = %self.kind, "Not authenticated, staying idle");
            self.reconnect = None;
            self.set_state(ConnectionState::Idle);
            return;
        }

        self.reconnect = None;
        let connector = Arc::clone(&self.connector);
        let credentials = Arc::clone(&self.credentials);
        let ws_base_url = self.ws_base_url.clone();
        let kind = self.kind;
        let open_timeout = self.policy.open_timeout;
        self.opening = Some(Box::pin(async move {
            let open = async {
                let token = credentials.access_token().await?;
                connector.open(&channel_url(&ws_base_url, kind, &token)).await
            };
            timeout(open_timeout, open)
                .await
                .unwrap_or(Err(TransportError::TimedOut(open_timeout)))
        }));
        self.set_state(ConnectionState::Connecting);
    }

    async fn disconnect(&mut self) {
        self.reconnect = None;
        self.opening = None;
        if let Some(mut socket) = self.socket.take() {
            if let Err(error) = socket.close(NORMAL_CLOSE, "client disconnect").await {
                tracing::debug!(channel = %self.kind, "Error while closing socket: {}", error);
            }
        }
        self.set_state(ConnectionState::Idle);
    }

    async fn send(&mut self, text: String) {
        let Some(socket) = self.socket.as_mut() else {
            tracing::debug!(channel = %self.kind, "Dropping outbound frame, channel not connected");
            return;
        };
        if let Err(error) = socket.send_text(text).await {
            tracing::warn!(channel = %self.kind, "Failed to send frame: {}", error);
            self.socket = None;
            self.schedule_reconnect();
        }
    }

    fn on_open_result(&mut self, result: Result<C::Socket, TransportError>) {
        self.opening = None;
        match result {
            Ok(socket) => {
                self.socket = Some(socket);
                self.reconnect = None;
                tracing::info!(channel = %self.kind, "Channel connected");
                self.set_state(ConnectionState::Connected);
            }
            Err(error) => {
                tracing::warn!(channel = %self.kind, "Failed to open channel: {}", error);
                self.schedule_reconnect();
            }
        }
    }

    fn on_frame(&mut self, frame: Option<Result<Frame, TransportError>>) {
        match frame {
            Some(Ok(Frame::Text(text))) => self.dispatch(&text),
            Some(Ok(Frame::Close(code))) => self.on_closed(code.unwrap_or(ABNORMAL_CLOSE)),
            Some(Err(error)) => {
                tracing::warn!(channel = %self.kind, "Channel error: {}", error);
                self.on_closed(ABNORMAL_CLOSE);
            }
            None => self.on_closed(ABNORMAL_CLOSE),
        }
    }

    fn dispatch(&self, text: &str) {
        match (self.decode)(text) {
            Ok(event) => {
                if self.events.send(SupervisorEvent::Event(event)).is_err() {
                    tracing::debug!(channel = %self.kind, "No listener for channel events");
                }
            }
            Err(error) => {
                tracing::warn!(channel = %self.kind, "Dropping frame: {}", error);
            }
        }
    }

    fn on_closed(&mut self, code: u16) {
        self.socket = None;
        tracing::info!(channel = %self.kind, code, "Channel closed");
        if code == NORMAL_CLOSE {
            self.set_state(ConnectionState::Idle);
        } else {
            self.schedule_reconnect();
        }
    }

    /// Arm the reconnect timer unless one is already pending.
    fn schedule_reconnect(&mut self) {
        if !self.credentials.is_authenticated() {
            tracing::debug!(channel = %self.kind, "Not authenticated, not reconnecting");
            self.set_state(ConnectionState::Idle);
            return;
        }
        if self.reconnect.is_none() {
            tracing::info!(
                channel = %self.kind,
                delay_ms = u64::try_from(self.policy.delay.as_millis()).unwrap_or(u64::MAX),
                "Scheduling reconnect"
            );
            self.reconnect = Some(Box::pin(sleep(self.policy.delay)));
        }
        self.set_state(ConnectionState::Reconnecting);
    }

    fn set_state(&self, state: ConnectionState) {
        if *self.state.borrow() == state {
            return;
        }
        self.state.send_replace(state);
        if self.events.send(SupervisorEvent::State(state)).is_err() {
            tracing::debug!(channel = %self.kind, "No listener for channel state");
        }
    }
}

async fn open_progress<S>(opening: &mut Option<OpenFuture<S>>) -> Result<S, TransportError> {
    match opening {
        Some(future) => future.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_frame<S: Socket>(socket: &mut Option<S>) -> Option<Result<Frame, TransportError>> {
    match socket {
        Some(socket) => socket.next_frame().await,
        None => std::future::pending().await,
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

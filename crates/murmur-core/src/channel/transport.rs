//! Socket abstraction the supervisor drives, and its WebSocket implementation.

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::auth::AuthError;

/// Inbound frame as seen by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Peer closed; carries the close code when the peer sent one
    Close(Option<u16>),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Credential unavailable: {0}")]
    Auth(#[from] AuthError),
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error("Socket is closed")]
    Closed,
    #[error("Timed out after {0:?} opening the socket")]
    TimedOut(Duration),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(error: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(error.to_string())
    }
}

/// Opens sockets for a channel URL.
pub trait Connector: Send + Sync + 'static {
    type Socket: Socket;

    fn open(&self, url: &str) -> impl Future<Output = Result<Self::Socket, TransportError>> + Send;
}

/// One open socket.
pub trait Socket: Send + 'static {
    /// Next text or close frame. `None` once the stream has ended.
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<Frame, TransportError>>> + Send;

    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn close(&mut self, code: u16, reason: &str) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// [`Connector`] over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

pub struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Connector for WsConnector {
    type Socket = WsSocket;

    async fn open(&self, url: &str) -> Result<WsSocket, TransportError> {
        let (stream, response) = connect_async(url).await?;
        tracing::debug!(status = response.status().as_u16(), "WebSocket handshake complete");
        Ok(WsSocket { stream })
    }
}

impl Socket for WsSocket {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(Message::Close(frame)) => {
                    return Some(Ok(Frame::Close(frame.map(|frame| u16::from(frame.code)))));
                }
                // Pings are answered by tungstenite itself.
                Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(error) => return Some(Err(error.into())),
            }
        }
    }

    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        self.stream.close(Some(frame)).await?;
        Ok(())
    }
}

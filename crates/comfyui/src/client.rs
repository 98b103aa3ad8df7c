//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the WebSocket URL and the correlation
//! `client_id` for one job. Call [`Connector::connect`] to establish a
//! live [`ComfyUIConnection`]. Every connect attempt reuses the same
//! `client_id`, so a reconnected socket is addressed exactly like the
//! original one.
//!
//! The [`Connector`] and [`FrameSource`] traits decouple the tracker
//! and reconnection logic from tungstenite.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Upper bound on a single connect handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One frame as seen by the execution tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A JSON text frame.
    Text(String),
    /// Binary frames carry preview images and are not inspected.
    Binary,
    /// The peer went away without the job finishing. Carries a
    /// human-readable reason.
    Closed(String),
}

/// A receive-side view of a duplex connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Block until the next meaningful frame arrives.
    async fn next_frame(&mut self) -> Result<Incoming, ComfyUIClientError>;

    /// Close the connection. Errors are swallowed; the handle is dead
    /// afterwards either way.
    async fn close(&mut self);
}

/// Opens fresh connections for one job.
#[async_trait]
pub trait Connector: Send + Sync {
    type Channel: FrameSource;

    /// Correlation id the server uses to address this job's socket.
    fn client_id(&self) -> &str;

    /// Perform a single bounded-timeout connection attempt.
    async fn connect(&self) -> Result<Self::Channel, ComfyUIClientError>;
}

/// Connection configuration for a ComfyUI instance and one job.
pub struct ComfyUIClient {
    ws_url: String,
    client_id: String,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Correlation id sent during the WebSocket handshake.
    pub client_id: String,
    ws_stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl ComfyUIClient {
    /// Create a client with a freshly generated UUID v4 `client_id`.
    ///
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8188`.
    pub fn new(ws_url: String) -> Self {
        Self::with_client_id(ws_url, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_client_id(ws_url: String, client_id: String) -> Self {
        Self { ws_url, client_id }
    }

    /// Correlation id attached to every connection this client opens.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Full WebSocket endpoint including the `clientId` query parameter.
    pub fn endpoint(&self) -> String {
        format!("{}/ws?clientId={}", self.ws_url, self.client_id)
    }
}

#[async_trait]
impl Connector for ComfyUIClient {
    type Channel = ComfyUIConnection;

    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn connect(&self) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = self.endpoint();
        tracing::debug!(url = %url, "Connecting to ComfyUI websocket");

        let (ws_stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(&url))
            .await
            .map_err(|_| {
                ComfyUIClientError::Connection(format!(
                    "Timed out after {}s connecting to ComfyUI at {}",
                    CONNECT_TIMEOUT.as_secs(),
                    self.ws_url
                ))
            })?
            .map_err(|e| {
                ComfyUIClientError::Connection(format!(
                    "Failed to connect to ComfyUI at {}: {e}",
                    self.ws_url
                ))
            })?;

        tracing::info!(client_id = %self.client_id, "Connected to ComfyUI at {}", self.ws_url);

        Ok(ComfyUIConnection {
            client_id: self.client_id.clone(),
            ws_stream,
        })
    }
}

#[async_trait]
impl FrameSource for ComfyUIConnection {
    async fn next_frame(&mut self) -> Result<Incoming, ComfyUIClientError> {
        loop {
            match self.ws_stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Incoming::Text(text)),
                Some(Ok(Message::Binary(_))) => return Ok(Incoming::Binary),
                Some(Ok(Message::Close(frame))) => {
                    let reason = match frame {
                        Some(frame) => format!(
                            "closed by server ({}): {}",
                            u16::from(frame.code),
                            frame.reason
                        ),
                        None => "closed by server".to_string(),
                    };
                    return Ok(Incoming::Closed(reason));
                }
                // Ping/Pong are answered by tungstenite.
                Some(Ok(_)) => continue,
                Some(Err(e)) if is_disconnect(&e) => return Ok(Incoming::Closed(e.to_string())),
                Some(Err(e)) => return Err(ComfyUIClientError::Protocol(e.to_string())),
                None => return Ok(Incoming::Closed("stream ended".to_string())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws_stream.close(None).await {
            tracing::debug!(client_id = %self.client_id, error = %e, "Error closing websocket");
        }
    }
}

/// Transport failures that mean "the socket is gone" rather than "the
/// peer spoke garbage". I/O errors (resets, read timeouts) land here.
fn is_disconnect(e: &WsError) -> bool {
    matches!(
        e,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Io(_)
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish a WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_carries_client_id() {
        let client = ComfyUIClient::with_client_id("ws://127.0.0.1:8188".into(), "abc".into());
        assert_eq!(client.endpoint(), "ws://127.0.0.1:8188/ws?clientId=abc");
    }

    #[test]
    fn new_generates_distinct_client_ids() {
        let a = ComfyUIClient::new("ws://h".into());
        let b = ComfyUIClient::new("ws://h".into());
        assert_ne!(a.client_id(), b.client_id());
        assert!(uuid::Uuid::parse_str(a.client_id()).is_ok());
    }

    #[test]
    fn io_errors_count_as_disconnect() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(is_disconnect(&WsError::Io(io)));
        assert!(is_disconnect(&WsError::ConnectionClosed));
        assert!(!is_disconnect(&WsError::Protocol(
            ProtocolError::HandshakeIncomplete
        )));
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let client = ComfyUIClient::new("ws://127.0.0.1:1".into());
        assert!(matches!(
            client.connect().await,
            Err(ComfyUIClientError::Connection(_))
        ));
    }
}

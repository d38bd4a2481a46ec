//! Relay Transport
//!
//! A [`Transport`] turns a relay URL into a pair of text-frame pipes. The
//! platform picks one implementation at startup; everything above this layer
//! only sees frames.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;

/// Socket-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// Outbound half of a relay connection
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a relay connection; ends when the connection drops
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Connection factory for the relay
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new connection to `url`
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), TransportError>;
}

/// WebSocket transport for native platforms
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), TransportError> {
        let (ws_stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!("WebSocket handshake done ({})", response.status());

        let (write, read) = ws_stream.split();

        let sink = write
            .with(|text: String| future::ready(Ok::<Message, TransportError>(Message::text(text))));

        let stream = read.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => Some(
                    String::from_utf8(bytes.to_vec())
                        .map_err(|e| TransportError::Malformed(e.to_string())),
                ),
                Ok(Message::Close(frame)) => Some(Err(TransportError::Closed(
                    frame
                        .map(|f| f.reason.as_str().to_owned())
                        .unwrap_or_else(|| "closed by relay".to_string()),
                ))),
                // Ping/pong are answered by tungstenite itself
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::WebSocket(e))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

//! Relay Networking
//!
//! A persistent connection to the relay service, with automatic reconnection.

mod backoff;
mod client;
mod session_code;
mod transport;

pub use backoff::Backoff;
pub use client::{ConnectionSettings, ConnectionState, NetworkError, RelayClient, TransportEvent};
pub use session_code::SessionCode;
pub use transport::{FrameSink, FrameStream, Transport, TransportError, WebSocketTransport};

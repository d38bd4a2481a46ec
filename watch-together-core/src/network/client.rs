//! Relay Client
//!
//! Keeps one persistent connection to the relay alive:
//! - frames outbound [`ClientMessage`]s and parses inbound [`ServerMessage`]s
//! - reconnects with exponential backoff when the connection drops
//! - gives up after a bounded reconnect window
//!
//! The connection runs in a background task; [`RelayClient`] is the handle.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::transport::{FrameSink, FrameStream, Transport, TransportError};
use crate::config::{BackoffConfig, SyncConfig};
use crate::sync::{ClientMessage, ServerMessage};

/// State of the relay connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Connection lost; `attempt` counts refused reconnect attempts since the drop
    Reconnecting { attempt: u32 },
}

/// Network-related errors
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    #[error("relay unreachable: {0}")]
    Unreachable(String),

    #[error("not connected to the relay")]
    NotConnected,

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Events emitted by the relay client
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Connection state changed
    State(ConnectionState),
    /// Decoded message from the relay
    Message(ServerMessage),
    /// A frame that could not be decoded; the connection stays up
    Malformed(String),
    /// A dropped connection was re-established
    Reconnected,
    /// Reconnect window exhausted; the client is now disconnected
    GaveUp(String),
}

/// Connection tuning
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    pub backoff: BackoffConfig,
    pub give_up_after: Duration,
}

impl From<&SyncConfig> for ConnectionSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            backoff: config.backoff,
            give_up_after: config.reconnect_give_up_after,
        }
    }
}

/// Commands sent to the connection task
#[derive(Debug)]
enum RelayCommand {
    /// Write a frame
    Send(String),
    /// Close the connection and stop
    Disconnect,
}

/// Why the pump loop returned
enum PumpExit {
    Disconnect,
    Dropped(String),
}

/// Handle to the running relay connection
pub struct RelayClient {
    command_tx: mpsc::UnboundedSender<RelayCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
    close_timeout: Duration,
}

impl RelayClient {
    /// Connect to the relay and start the connection task.
    ///
    /// The first attempt is not retried: it fails with
    /// [`NetworkError::Unreachable`] after `connect_timeout`.
    pub async fn connect(
        transport: Arc<dyn Transport>,
        url: &str,
        settings: ConnectionSettings,
    ) -> Result<(RelayClient, mpsc::UnboundedReceiver<TransportEvent>), NetworkError> {
        info!("Connecting to relay at {}", url);
        let (sink, stream) = connect_once(transport.as_ref(), url, settings.connect_timeout)
            .await
            .map_err(NetworkError::Unreachable)?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let _ = event_tx.send(TransportEvent::State(ConnectionState::Connected));

        let connection = Connection {
            transport,
            url: url.to_string(),
            settings,
            event_tx,
            state_tx,
        };
        let task = tokio::spawn(connection.run(sink, stream, command_rx));

        Ok((
            RelayClient {
                command_tx,
                state_rx,
                task: Some(task),
                close_timeout: settings.connect_timeout,
            },
            event_rx,
        ))
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Queue a message for the relay.
    ///
    /// Fails with [`NetworkError::NotConnected`] unless connected; nothing is
    /// buffered for later.
    pub fn send(&self, message: &ClientMessage) -> Result<(), NetworkError> {
        if !self.is_connected() {
            return Err(NetworkError::NotConnected);
        }
        let frame =
            serde_json::to_string(message).map_err(|e| NetworkError::Protocol(e.to_string()))?;
        self.command_tx
            .send(RelayCommand::Send(frame))
            .map_err(|_| NetworkError::NotConnected)
    }

    /// Close the connection, cancelling any pending reconnect. Idempotent.
    ///
    /// Returns within `connect_timeout` even if the socket stops accepting
    /// writes; the task is aborted in that case.
    pub async fn disconnect(&mut self) {
        let Some(mut task) = self.task.take() else {
            return;
        };
        let _ = self.command_tx.send(RelayCommand::Disconnect);
        match tokio::time::timeout(self.close_timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Relay task ended abnormally: {}", e),
            Err(_) => {
                warn!("Relay connection did not close within {:?}, aborting", self.close_timeout);
                task.abort();
            }
        }
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// One bounded connection attempt
async fn connect_once(
    transport: &dyn Transport,
    url: &str,
    timeout: Duration,
) -> Result<(FrameSink, FrameStream), String> {
    match tokio::time::timeout(timeout, transport.connect(url)).await {
        Ok(Ok(pair)) => Ok(pair),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no answer within {:?}", timeout)),
    }
}

/// State owned by the connection task
struct Connection {
    transport: Arc<dyn Transport>,
    url: String,
    settings: ConnectionSettings,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Connection {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
        let _ = self.event_tx.send(TransportEvent::State(state));
    }

    /// Run the connection until disconnected or the reconnect window closes
    async fn run(
        self,
        mut sink: FrameSink,
        mut stream: FrameStream,
        mut command_rx: mpsc::UnboundedReceiver<RelayCommand>,
    ) {
        let mut backoff = Backoff::new(self.settings.backoff);

        loop {
            match self.pump(&mut sink, &mut stream, &mut command_rx).await {
                PumpExit::Disconnect => {
                    let close = tokio::time::timeout(self.settings.connect_timeout, sink.close());
                    match close.await {
                        Ok(_) => info!("Relay connection closed"),
                        Err(_) => warn!("Relay connection did not close cleanly"),
                    }
                    break;
                }
                PumpExit::Dropped(reason) => {
                    warn!("Relay connection lost: {}", reason);
                }
            }

            match self.reconnect(&mut backoff, &mut command_rx).await {
                Some((new_sink, new_stream)) => {
                    sink = new_sink;
                    stream = new_stream;
                    backoff.reset();
                    self.set_state(ConnectionState::Connected);
                    let _ = self.event_tx.send(TransportEvent::Reconnected);
                    info!("Reconnected to relay");
                }
                None => break,
            }
        }

        self.state_tx.send_replace(ConnectionState::Disconnected);
        let _ = self.event_tx.send(TransportEvent::State(ConnectionState::Disconnected));
    }

    /// Move frames both ways until the connection drops or we are told to stop
    async fn pump(
        &self,
        sink: &mut FrameSink,
        stream: &mut FrameStream,
        command_rx: &mut mpsc::UnboundedReceiver<RelayCommand>,
    ) -> PumpExit {
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(RelayCommand::Send(frame)) => {
                        if let Err(e) = sink.send(frame).await {
                            return PumpExit::Dropped(e.to_string());
                        }
                    }
                    Some(RelayCommand::Disconnect) | None => return PumpExit::Disconnect,
                },
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.deliver(&text),
                    Some(Err(TransportError::Malformed(e))) => {
                        warn!("Skipping malformed frame: {}", e);
                        let _ = self.event_tx.send(TransportEvent::Malformed(e));
                    }
                    Some(Err(e)) => return PumpExit::Dropped(e.to_string()),
                    None => return PumpExit::Dropped("stream ended".to_string()),
                },
            }
        }
    }

    fn deliver(&self, text: &str) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(message) => {
                debug!("Relay message: {:?}", message);
                let _ = self.event_tx.send(TransportEvent::Message(message));
            }
            Err(e) => {
                warn!("Skipping undecodable message: {}", e);
                let _ = self.event_tx.send(TransportEvent::Malformed(e.to_string()));
            }
        }
    }

    /// Retry until connected, disconnected, or out of time.
    ///
    /// The first retry goes out right away. Each refused attempt publishes
    /// `Reconnecting { attempt }` and waits out the next backoff delay.
    async fn reconnect(
        &self,
        backoff: &mut Backoff,
        command_rx: &mut mpsc::UnboundedReceiver<RelayCommand>,
    ) -> Option<(FrameSink, FrameStream)> {
        let started = Instant::now();
        let mut refused = 0u32;

        // Only the watch sees this, so `send` fails while the retry is in flight
        self.state_tx.send_replace(ConnectionState::Connecting);

        loop {
            let attempt_result = tokio::select! {
                result = connect_once(self.transport.as_ref(), &self.url, self.settings.connect_timeout) => Some(result),
                cancelled = wait_for_disconnect(command_rx) => {
                    debug!("Disconnect during reconnect attempt ({})", cancelled);
                    None
                }
            };

            match attempt_result {
                Some(Ok(pair)) => return Some(pair),
                Some(Err(e)) => {
                    refused += 1;
                    warn!("Reconnect attempt {} failed: {}", refused, e);
                }
                None => return None,
            }
            self.set_state(ConnectionState::Reconnecting { attempt: refused });

            let delay = backoff.next_delay();
            debug!("Next reconnect attempt in {:?}", delay);
            if !self.wait(delay, command_rx).await {
                info!("Reconnect cancelled");
                return None;
            }

            if started.elapsed() >= self.settings.give_up_after {
                let reason = format!("no connection for {:?}", started.elapsed());
                warn!("Giving up on the relay: {}", reason);
                let _ = self.event_tx.send(TransportEvent::GaveUp(reason));
                return None;
            }
        }
    }

    /// Sleep for `delay`; returns false if a disconnect arrived first
    async fn wait(
        &self,
        delay: Duration,
        command_rx: &mut mpsc::UnboundedReceiver<RelayCommand>,
    ) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = wait_for_disconnect(command_rx) => false,
        }
    }
}

/// Resolve once a disconnect is requested, discarding frames queued meanwhile
async fn wait_for_disconnect(command_rx: &mut mpsc::UnboundedReceiver<RelayCommand>) -> &'static str {
    loop {
        match command_rx.recv().await {
            Some(RelayCommand::Send(_)) => debug!("Dropping frame queued while disconnected"),
            Some(RelayCommand::Disconnect) => return "requested",
            None => return "handle dropped",
        }
    }
}

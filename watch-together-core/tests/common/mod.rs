//! Shared test harness: an in-process relay and a recording player

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::{mpsc, oneshot};
use futures::{future, Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};

use watch_together_core::network::{FrameSink, FrameStream, Transport, TransportError};
use watch_together_core::player::{BufferingListener, PlaybackBridge};
use watch_together_core::sync::{
    ClientMessage, ControlMode, Participant, ServerMessage, SessionDescriptor, SessionEvent,
};
use watch_together_core::{Platform, SyncConfig};

/// How long a test waits for something before failing
pub const WAIT: Duration = Duration::from_secs(300);

type Frame = Result<String, TransportError>;

struct Connection {
    outbox: mpsc::UnboundedSender<Frame>,
    kill: Option<oneshot::Sender<()>>,
}

struct Member {
    session_id: String,
    conn_id: u64,
    participant: Participant,
}

struct HostedSession {
    control_mode: ControlMode,
    created_at_ms: u64,
    /// Participant ids in join order, host first
    members: Vec<String>,
}

#[derive(Default)]
struct RelayState {
    next_conn: u64,
    next_participant: u64,
    session_ids: VecDeque<String>,
    failing_connects: u32,
    connect_attempts: u32,
    capacity: Option<usize>,
    silent: bool,
    hanging_connects: bool,
    stuck_close: bool,
    connections: HashMap<u64, Connection>,
    sessions: HashMap<String, HostedSession>,
    members: HashMap<String, Member>,
}

/// Relay that lives in the test process and speaks the session protocol
#[derive(Clone, Default)]
pub struct FakeRelay {
    inner: Arc<Mutex<RelayState>>,
}

impl FakeRelay {
    /// Relay handing out the given session ids in order
    pub fn with_session_ids<I: IntoIterator<Item = &'static str>>(ids: I) -> Self {
        let relay = Self::default();
        relay.inner.lock().session_ids = ids.into_iter().map(String::from).collect();
        relay
    }

    /// Refuse the next `n` connection attempts
    pub fn fail_next_connects(&self, n: u32) {
        self.inner.lock().failing_connects = n;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.inner.lock().connect_attempts
    }

    /// Limit members per session
    pub fn set_capacity(&self, capacity: usize) {
        self.inner.lock().capacity = Some(capacity);
    }

    /// Accept connections but never answer create/join
    pub fn set_silent(&self, silent: bool) {
        self.inner.lock().silent = silent;
    }

    /// Connection attempts never resolve
    pub fn set_hanging_connects(&self, hanging: bool) {
        self.inner.lock().hanging_connects = hanging;
    }

    /// New connections accept writes but never finish closing
    pub fn set_stuck_close(&self, stuck: bool) {
        self.inner.lock().stuck_close = stuck;
    }

    /// Cut the participant's current connection from the relay side
    pub fn drop_connection(&self, participant_id: &str) {
        let mut state = self.inner.lock();
        let Some(conn_id) = state.members.get(participant_id).map(|m| m.conn_id) else {
            panic!("unknown participant {}", participant_id);
        };
        if let Some(kill) = state.connections.get_mut(&conn_id).and_then(|c| c.kill.take()) {
            let _ = kill.send(());
        }
        state.connections.remove(&conn_id);
    }

    /// Push a message to the participant as if the relay sent it
    pub fn inject(&self, participant_id: &str, message: ServerMessage) {
        let state = self.inner.lock();
        let conn_id = state.members[participant_id].conn_id;
        send_to(&state, conn_id, &message);
    }

    /// Push a raw text frame to the participant
    pub fn inject_raw(&self, participant_id: &str, frame: &str) {
        self.push(participant_id, Ok(frame.to_string()));
    }

    /// Deliver a frame the transport itself could not read
    pub fn inject_unreadable(&self, participant_id: &str) {
        self.push(participant_id, Err(TransportError::Malformed("invalid utf-8".to_string())));
    }

    fn push(&self, participant_id: &str, frame: Frame) {
        let state = self.inner.lock();
        let conn_id = state.members[participant_id].conn_id;
        if let Some(connection) = state.connections.get(&conn_id) {
            let _ = connection.outbox.unbounded_send(frame);
        }
    }

    fn handle_frame(&self, conn_id: u64, frame: &str) {
        let message: ClientMessage = match serde_json::from_str(frame) {
            Ok(message) => message,
            Err(e) => panic!("client sent an undecodable frame {:?}: {}", frame, e),
        };
        let mut state = self.inner.lock();

        match message {
            ClientMessage::CreateSession {
                control_mode,
                display_name,
            } => {
                if state.silent {
                    return;
                }
                let session_id = state
                    .session_ids
                    .pop_front()
                    .unwrap_or_else(|| format!("S{}", state.next_conn));
                let pid = new_participant_id(&mut state);
                let participant = Participant::new(pid.clone(), display_name, true);
                state.sessions.insert(
                    session_id.clone(),
                    HostedSession {
                        control_mode,
                        created_at_ms: 1_700_000_000_000,
                        members: vec![pid.clone()],
                    },
                );
                state.members.insert(
                    pid,
                    Member {
                        session_id: session_id.clone(),
                        conn_id,
                        participant: participant.clone(),
                    },
                );
                send_to(
                    &state,
                    conn_id,
                    &ServerMessage::SessionCreated {
                        session_id,
                        participant,
                    },
                );
            }

            ClientMessage::JoinSession {
                session_id,
                display_name,
            } => {
                if state.silent {
                    return;
                }
                let Some(session) = state.sessions.get(&session_id) else {
                    send_to(&state, conn_id, &error("invalidCode"));
                    return;
                };
                if state.capacity.is_some_and(|cap| session.members.len() >= cap) {
                    send_to(&state, conn_id, &error("full"));
                    return;
                }
                let descriptor = SessionDescriptor {
                    session_id: session_id.clone(),
                    control_mode: session.control_mode,
                    created_at_ms: session.created_at_ms,
                };

                let pid = new_participant_id(&mut state);
                state.members.insert(
                    pid.clone(),
                    Member {
                        session_id: session_id.clone(),
                        conn_id,
                        participant: Participant::new(pid.clone(), display_name, false),
                    },
                );
                if let Some(session) = state.sessions.get_mut(&session_id) {
                    session.members.push(pid.clone());
                }

                let roster = roster_of(&state, &session_id);
                send_to(
                    &state,
                    conn_id,
                    &ServerMessage::SessionJoined {
                        session: descriptor,
                        participant_id: pid.clone(),
                        roster: roster.clone(),
                    },
                );
                broadcast_except(
                    &state,
                    &session_id,
                    &pid,
                    &ServerMessage::RosterUpdate { participants: roster },
                );
            }

            ClientMessage::Resume {
                session_id,
                participant_id,
            } => {
                if !state.members.contains_key(&participant_id) {
                    send_to(&state, conn_id, &error("expired"));
                    return;
                }
                if let Some(member) = state.members.get_mut(&participant_id) {
                    member.conn_id = conn_id;
                }
                let roster = roster_of(&state, &session_id);
                send_to(&state, conn_id, &ServerMessage::RosterUpdate { participants: roster });
            }

            ClientMessage::PlaybackCommand { kind, position_ms } => {
                let Some((pid, session_id)) = member_on(&state, conn_id) else {
                    return;
                };
                broadcast_except(
                    &state,
                    &session_id,
                    &pid,
                    &ServerMessage::PlaybackCommand {
                        kind,
                        position_ms,
                        by_participant: pid.clone(),
                    },
                );
            }

            ClientMessage::BufferingStatus { is_buffering } => {
                let Some((pid, session_id)) = member_on(&state, conn_id) else {
                    return;
                };
                broadcast_except(
                    &state,
                    &session_id,
                    &pid,
                    &ServerMessage::BufferingStatus {
                        participant_id: pid.clone(),
                        is_buffering,
                    },
                );
            }

            ClientMessage::PlaybackStatus { position_ms, paused } => {
                let Some((pid, session_id)) = member_on(&state, conn_id) else {
                    return;
                };
                broadcast_except(
                    &state,
                    &session_id,
                    &pid,
                    &ServerMessage::PlaybackStatus {
                        participant_id: pid.clone(),
                        position_ms,
                        paused,
                    },
                );
            }

            ClientMessage::LeaveSession => {
                let Some((pid, session_id)) = member_on(&state, conn_id) else {
                    return;
                };
                state.members.remove(&pid);
                if let Some(session) = state.sessions.get_mut(&session_id) {
                    session.members.retain(|m| *m != pid);
                }
                let roster = roster_of(&state, &session_id);
                broadcast_except(
                    &state,
                    &session_id,
                    &pid,
                    &ServerMessage::RosterUpdate { participants: roster },
                );
            }

            ClientMessage::EndSession => {
                let Some((pid, session_id)) = member_on(&state, conn_id) else {
                    return;
                };
                broadcast_except(
                    &state,
                    &session_id,
                    &pid,
                    &ServerMessage::SessionEnded {
                        reason: Some("host ended the session".to_string()),
                    },
                );
                if let Some(session) = state.sessions.remove(&session_id) {
                    for member in session.members {
                        state.members.remove(&member);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Transport for FakeRelay {
    async fn connect(&self, _url: &str) -> Result<(FrameSink, FrameStream), TransportError> {
        let hanging = {
            let mut state = self.inner.lock();
            state.connect_attempts += 1;
            state.hanging_connects
        };
        if hanging {
            return future::pending::<Result<(FrameSink, FrameStream), TransportError>>().await;
        }

        let (conn_id, inbound, outbound, kill, stuck_close) = {
            let mut state = self.inner.lock();
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(TransportError::Connect("connection refused".to_string()));
            }

            state.next_conn += 1;
            let conn_id = state.next_conn;
            let (out_tx, out_rx) = mpsc::unbounded::<Frame>();
            let (in_tx, in_rx) = mpsc::unbounded::<String>();
            let (kill_tx, kill_rx) = oneshot::channel::<()>();
            state.connections.insert(
                conn_id,
                Connection {
                    outbox: out_tx,
                    kill: Some(kill_tx),
                },
            );
            (conn_id, in_rx, (in_tx, out_rx), kill_rx, state.stuck_close)
        };

        let relay = self.clone();
        let mut inbound = inbound;
        tokio::spawn(async move {
            while let Some(frame) = inbound.next().await {
                relay.handle_frame(conn_id, &frame);
            }
        });

        let (in_tx, out_rx) = outbound;
        let sink = in_tx.sink_map_err(|e| TransportError::Closed(e.to_string()));
        let sink: FrameSink = if stuck_close {
            Box::pin(StuckClose(Box::pin(sink)))
        } else {
            Box::pin(sink)
        };
        let stream: FrameStream = Box::pin(out_rx.take_until(kill));
        Ok((sink, stream))
    }
}

/// Sink that writes normally but whose close never completes
struct StuckClose(FrameSink);

impl Sink<String> for StuckClose {
    type Error = TransportError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.0.as_mut().poll_ready(cx)
    }

    fn start_send(mut self: Pin<&mut Self>, item: String) -> Result<(), Self::Error> {
        self.0.as_mut().start_send(item)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.0.as_mut().poll_flush(cx)
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Pending
    }
}

fn new_participant_id(state: &mut RelayState) -> String {
    state.next_participant += 1;
    format!("p{}", state.next_participant)
}

fn error(reason: &str) -> ServerMessage {
    ServerMessage::Error {
        reason: reason.to_string(),
    }
}

fn send_to(state: &RelayState, conn_id: u64, message: &ServerMessage) {
    let Some(connection) = state.connections.get(&conn_id) else {
        return;
    };
    if let Ok(frame) = serde_json::to_string(message) {
        let _ = connection.outbox.unbounded_send(Ok(frame));
    }
}

fn member_on(state: &RelayState, conn_id: u64) -> Option<(String, String)> {
    state
        .members
        .iter()
        .find(|(_, m)| m.conn_id == conn_id)
        .map(|(pid, m)| (pid.clone(), m.session_id.clone()))
}

fn roster_of(state: &RelayState, session_id: &str) -> Vec<Participant> {
    state
        .sessions
        .get(session_id)
        .map(|s| {
            s.members
                .iter()
                .filter_map(|pid| state.members.get(pid))
                .map(|m| m.participant.clone())
                .collect()
        })
        .unwrap_or_default()
}

fn broadcast_except(state: &RelayState, session_id: &str, except: &str, message: &ServerMessage) {
    let Some(session) = state.sessions.get(session_id) else {
        return;
    };
    for pid in session.members.iter().filter(|pid| *pid != except) {
        if let Some(member) = state.members.get(pid) {
            send_to(state, member.conn_id, message);
        }
    }
}

/// Everything the core asked the player to do
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCall {
    CurrentPosition,
    IsPaused,
    SeekTo(Duration),
    Play,
    Pause,
}

/// Player that records every call made on it
#[derive(Default)]
pub struct RecordingPlayer {
    position: Mutex<Duration>,
    calls: Mutex<Vec<PlayerCall>>,
    listener: Mutex<Option<BufferingListener>>,
}

impl RecordingPlayer {
    pub fn calls(&self) -> Vec<PlayerCall> {
        self.calls.lock().clone()
    }

    /// Simulate the player starting or stopping to buffer
    pub fn set_buffering(&self, is_buffering: bool) {
        if let Some(listener) = self.listener.lock().as_ref() {
            listener(is_buffering);
        }
    }
}

impl PlaybackBridge for RecordingPlayer {
    fn current_position(&self) -> Duration {
        self.calls.lock().push(PlayerCall::CurrentPosition);
        *self.position.lock()
    }

    fn is_paused(&self) -> bool {
        self.calls.lock().push(PlayerCall::IsPaused);
        true
    }

    fn seek_to(&self, position: Duration) {
        self.calls.lock().push(PlayerCall::SeekTo(position));
        *self.position.lock() = position;
    }

    fn play(&self) {
        self.calls.lock().push(PlayerCall::Play);
    }

    fn pause(&self) {
        self.calls.lock().push(PlayerCall::Pause);
    }

    fn subscribe_buffering(&self, listener: BufferingListener) {
        *self.listener.lock() = Some(listener);
    }
}

/// Config pointing at the fake relay, with the status timer out of the way
pub fn test_config(relay: &FakeRelay, display_name: &str) -> SyncConfig {
    let mut config = SyncConfig::with_platform(Platform::with_transport(Arc::new(relay.clone())));
    config.relay_url = "http://relay.test".to_string();
    config.display_name = display_name.to_string();
    config.status_interval = Duration::from_secs(24 * 60 * 60);
    config
}

/// Wait for the first event matching `pred`
pub async fn next_matching(
    events: &mut broadcast::Receiver<SessionEvent>,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    let found = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await;
    match found {
        Ok(event) => event,
        Err(_) => panic!("timed out waiting for event"),
    }
}

//! Session Coordinator
//!
//! A single task owns the session phase and the relay connection. UI
//! commands, relay events, request deadlines and the status timer are all
//! funnelled into it, so state changes happen in one place and in order.
//!
//! [`SessionHandle`] is the cloneable front door: async request/reply calls
//! for the UI, a broadcast of [`SessionEvent`]s, and a watch of the latest
//! [`SessionSnapshot`].

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::authority::authorize;
use super::error::SessionError;
use super::protocol::{
    position_to_ms, ClientMessage, CommandKind, ControlMode, JoinFailureReason, Participant,
    PlaybackCommand,
};
use super::state::{PhaseKind, Role, SessionInfo, SessionPhase};
use crate::config::SyncConfig;
use crate::network::{
    ConnectionSettings, ConnectionState, RelayClient, SessionCode, TransportEvent,
};
use crate::player::PlaybackBridge;

/// Buffered events per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 256;

/// Why a session ended without us asking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The host ended it (or the relay closed it)
    HostEnded,
    /// The relay stayed unreachable for the whole reconnect window
    ConnectionLost,
}

/// Everything observers are told about
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged(PhaseKind),
    ConnectionChanged(ConnectionState),
    RosterChanged(Vec<Participant>),
    /// An authorized remote command was applied to the local player
    RemoteCommandApplied {
        command: PlaybackCommand,
        by: String,
    },
    SessionEnded {
        reason: EndReason,
    },
    Failed(SessionError),
}

/// Read-only view of the session at a point in time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub phase: PhaseKind,
    pub connection: ConnectionState,
    pub session: Option<SessionInfo>,
    /// Host first, then by display name
    pub participants: Vec<Participant>,
    pub local_participant_id: Option<String>,
}

impl SessionSnapshot {
    pub fn is_host(&self) -> bool {
        matches!(self.phase, PhaseKind::Active { role: Role::Host })
    }

    pub fn is_in_session(&self) -> bool {
        matches!(self.phase, PhaseKind::Active { .. })
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Commands sent to the coordinator task
pub(super) enum Command {
    Create {
        control_mode: ControlMode,
        reply: Reply<SessionInfo>,
    },
    Join {
        code: String,
        reply: Reply<SessionInfo>,
    },
    Leave {
        reply: Reply<()>,
    },
    End {
        reply: Reply<()>,
    },
    Playback {
        kind: CommandKind,
        /// `None` means "wherever the player is now"
        position: Option<Duration>,
        reply: Reply<()>,
    },
    LocalBuffering(bool),
    Shutdown,
}

/// Handle to the session coordinator
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::UnboundedSender<Command>,
    event_tx: broadcast::Sender<SessionEvent>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Spawn the coordinator on the current tokio runtime
    pub fn start(config: SyncConfig, player: Arc<dyn PlaybackBridge>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let buffering_tx = command_tx.downgrade();
        player.subscribe_buffering(Box::new(move |is_buffering| {
            if let Some(tx) = buffering_tx.upgrade() {
                let _ = tx.send(Command::LocalBuffering(is_buffering));
            }
        }));

        let coordinator = Coordinator::new(config, player, event_tx.clone(), snapshot_tx);
        tokio::spawn(coordinator.run(command_rx));

        Self {
            command_tx,
            event_tx,
            snapshot_rx,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(make(reply))
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)?
    }

    /// Create a session and become its host. Leaves any current session first.
    pub async fn create_session(&self, control_mode: ControlMode) -> Result<SessionInfo, SessionError> {
        self.request(|reply| Command::Create { control_mode, reply }).await
    }

    /// Join an existing session by its code. Leaves any current session first.
    pub async fn join_session(&self, code: &str) -> Result<SessionInfo, SessionError> {
        let code = code.to_string();
        self.request(|reply| Command::Join { code, reply }).await
    }

    /// Leave the current session. Succeeds when there is nothing to leave.
    pub async fn leave_session(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Leave { reply }).await
    }

    /// End the session for everyone (host only)
    pub async fn end_session(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::End { reply }).await
    }

    pub async fn play(&self) -> Result<(), SessionError> {
        self.playback(CommandKind::Play, None).await
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.playback(CommandKind::Pause, None).await
    }

    pub async fn seek(&self, position: Duration) -> Result<(), SessionError> {
        self.playback(CommandKind::Seek, Some(position)).await
    }

    async fn playback(&self, kind: CommandKind, position: Option<Duration>) -> Result<(), SessionError> {
        self.request(|reply| Command::Playback {
            kind,
            position,
            reply,
        })
        .await
    }

    /// Receive events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Watch the latest snapshot
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn session(&self) -> Option<SessionInfo> {
        self.snapshot_rx.borrow().session.clone()
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.snapshot_rx.borrow().participants.clone()
    }

    pub fn is_host(&self) -> bool {
        self.snapshot_rx.borrow().is_host()
    }

    pub fn is_in_session(&self) -> bool {
        self.snapshot_rx.borrow().is_in_session()
    }

    pub fn participant_count(&self) -> usize {
        self.snapshot_rx.borrow().participant_count()
    }

    /// Leave any session and stop the coordinator task
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }

    /// Leave the session, waiting at most `grace` for the relay to hear
    /// about it, then stop the coordinator task
    pub async fn close(&self, grace: Duration) {
        match tokio::time::timeout(grace, self.leave_session()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Leave on close failed: {}", e),
            Err(_) => warn!("Leave on close took longer than {:?}", grace),
        }
        self.shutdown();
    }
}

/// The live relay connection and its event stream
pub(super) struct RelayLink {
    pub(super) client: RelayClient,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// A create or join waiting for the relay's answer
pub(super) struct PendingRequest {
    pub(super) deadline: Instant,
    pub(super) reply: Reply<SessionInfo>,
}

/// Next thing the coordinator has to deal with
enum Input {
    Command(Command),
    Transport(TransportEvent),
    TransportClosed,
    RequestTimeout,
    StatusTick,
    Stop,
}

/// State owned by the coordinator task
pub(super) struct Coordinator {
    pub(super) config: SyncConfig,
    pub(super) player: Arc<dyn PlaybackBridge>,
    pub(super) phase: SessionPhase,
    pub(super) relay: Option<RelayLink>,
    pub(super) pending: Option<PendingRequest>,
    pub(super) connection: ConnectionState,
    events: broadcast::Sender<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl Coordinator {
    pub(super) fn new(
        config: SyncConfig,
        player: Arc<dyn PlaybackBridge>,
        events: broadcast::Sender<SessionEvent>,
        snapshot: watch::Sender<SessionSnapshot>,
    ) -> Self {
        Self {
            config,
            player,
            phase: SessionPhase::Idle,
            relay: None,
            pending: None,
            connection: ConnectionState::Disconnected,
            events,
            snapshot,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let period = self.config.status_interval;
        let mut status = tokio::time::interval_at(Instant::now() + period, period);
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Session coordinator started");
        loop {
            match self.next_input(&mut commands, &mut status).await {
                Input::Command(Command::Shutdown) | Input::Stop => break,
                Input::Command(command) => self.handle_command(command).await,
                Input::Transport(event) => self.handle_transport_event(event).await,
                Input::TransportClosed => {
                    warn!("Relay task ended unexpectedly");
                    self.connection_lost("relay connection closed".to_string()).await;
                }
                Input::RequestTimeout => self.on_request_timeout().await,
                Input::StatusTick => self.report_status(),
            }
        }

        if !self.phase.is_idle() {
            self.leave_current().await;
        }
        info!("Session coordinator stopped");
    }

    async fn next_input(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        status: &mut Interval,
    ) -> Input {
        let deadline = self.pending.as_ref().map(|p| p.deadline);
        let relay = self.relay.as_mut();

        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => Input::Command(command),
                None => Input::Stop,
            },
            event = next_transport_event(relay) => match event {
                Some(event) => Input::Transport(event),
                None => Input::TransportClosed,
            },
            _ = sleep_until_deadline(deadline) => Input::RequestTimeout,
            _ = status.tick() => Input::StatusTick,
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Create { control_mode, reply } => self.create_session(control_mode, reply).await,
            Command::Join { code, reply } => self.join_session(&code, reply).await,
            Command::Leave { reply } => {
                if self.phase.is_idle() {
                    debug!("Leave requested while idle");
                } else {
                    self.leave_current().await;
                }
                let _ = reply.send(Ok(()));
            }
            Command::End { reply } => {
                let result = match self.phase.state().map(|s| s.is_host()) {
                    None => Err(SessionError::NotInSession),
                    Some(false) => Err(SessionError::NotHost),
                    Some(true) => {
                        self.leave_current().await;
                        Ok(())
                    }
                };
                let _ = reply.send(result);
            }
            Command::Playback {
                kind,
                position,
                reply,
            } => {
                let _ = reply.send(self.local_playback(kind, position));
            }
            Command::LocalBuffering(is_buffering) => self.local_buffering(is_buffering),
            Command::Shutdown => {}
        }
    }

    async fn create_session(&mut self, control_mode: ControlMode, reply: Reply<SessionInfo>) {
        if !self.phase.is_idle() {
            info!("Leaving current session before creating a new one");
            self.leave_current().await;
        }

        self.set_phase(SessionPhase::Creating { control_mode });
        if let Err(e) = self.open_relay().await {
            self.set_phase(SessionPhase::Idle);
            let _ = reply.send(Err(e));
            return;
        }

        let message = ClientMessage::CreateSession {
            control_mode,
            display_name: self.config.display_name.clone(),
        };
        if let Err(e) = self.send(&message) {
            self.abandon_request(reply, SessionError::SessionCreateFailed(e.to_string()))
                .await;
            return;
        }
        self.park(reply);
    }

    async fn join_session(&mut self, raw_code: &str, reply: Reply<SessionInfo>) {
        let Some(code) = SessionCode::parse(raw_code) else {
            info!("Rejecting malformed session code {:?}", raw_code);
            let _ = reply.send(Err(SessionError::SessionJoinFailed {
                reason: JoinFailureReason::InvalidCode,
            }));
            return;
        };

        if !self.phase.is_idle() {
            info!("Leaving current session before joining {}", code);
            self.leave_current().await;
        }

        let message = ClientMessage::JoinSession {
            session_id: code.as_str().to_string(),
            display_name: self.config.display_name.clone(),
        };
        self.set_phase(SessionPhase::Joining { code });
        if let Err(e) = self.open_relay().await {
            self.set_phase(SessionPhase::Idle);
            let _ = reply.send(Err(e));
            return;
        }

        if let Err(e) = self.send(&message) {
            self.abandon_request(reply, e).await;
            return;
        }
        self.park(reply);
    }

    /// Wait for the relay's answer until the request deadline
    fn park(&mut self, reply: Reply<SessionInfo>) {
        self.pending = Some(PendingRequest {
            deadline: Instant::now() + self.config.request_timeout,
            reply,
        });
    }

    /// Fail a create/join that never got parked
    async fn abandon_request(&mut self, reply: Reply<SessionInfo>, error: SessionError) {
        warn!("Session request failed: {}", error);
        self.close_relay().await;
        self.set_phase(SessionPhase::Idle);
        let _ = reply.send(Err(error));
    }

    /// Fail the parked create/join, drop the connection and go idle
    pub(super) async fn fail_pending(&mut self, error: SessionError) {
        let pending = self.pending.take();
        warn!("Session request failed: {}", error);
        self.close_relay().await;
        self.set_phase(SessionPhase::Idle);
        if let Some(pending) = pending {
            let _ = pending.reply.send(Err(error));
        }
    }

    async fn on_request_timeout(&mut self) {
        let error = match self.phase {
            SessionPhase::Creating { .. } => {
                SessionError::SessionCreateFailed("relay did not answer in time".to_string())
            }
            SessionPhase::Joining { .. } => SessionError::SessionJoinFailed {
                reason: JoinFailureReason::TimedOut,
            },
            _ => {
                self.pending = None;
                return;
            }
        };
        self.fail_pending(error).await;
    }

    /// Leave whatever we're in and end up idle with no connection
    pub(super) async fn leave_current(&mut self) {
        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(SessionError::Cancelled));
        }

        if let Some(state) = self.phase.state() {
            let message = if state.is_host() {
                info!("Ending session {}", state.session_id());
                ClientMessage::EndSession
            } else {
                info!("Leaving session {}", state.session_id());
                ClientMessage::LeaveSession
            };
            if let Err(e) = self.send(&message) {
                debug!("Could not tell the relay we left: {}", e);
            }
        }

        self.set_phase(SessionPhase::Leaving);
        self.close_relay().await;
        self.set_phase(SessionPhase::Idle);
    }

    /// Reconnect window exhausted, or the relay task died
    pub(super) async fn connection_lost(&mut self, reason: String) {
        let was_active = self.phase.is_active();
        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(SessionError::Unreachable(reason.clone())));
        }

        self.close_relay().await;
        self.set_phase(SessionPhase::Idle);

        if was_active {
            warn!("Session lost: {}", reason);
            self.emit(SessionEvent::SessionEnded {
                reason: EndReason::ConnectionLost,
            });
            self.emit(SessionEvent::Failed(SessionError::Unreachable(reason)));
        }
    }

    fn local_playback(&mut self, kind: CommandKind, position: Option<Duration>) -> Result<(), SessionError> {
        let state = self.phase.state().ok_or(SessionError::NotInSession)?;
        if !authorize(state.control_mode(), state.is_host(), kind).is_allowed() {
            info!("Local {} not permitted in a host-only session", kind);
            return Err(SessionError::PermissionDenied(kind));
        }
        let local_id = state.local_participant_id().to_string();

        let position = position.unwrap_or_else(|| self.player.current_position());
        let position_ms = position_to_ms(position);
        self.send(&ClientMessage::PlaybackCommand { kind, position_ms })?;

        match kind {
            CommandKind::Play => self.player.play(),
            CommandKind::Pause => self.player.pause(),
            CommandKind::Seek => self.player.seek_to(position),
        }
        let paused = match kind {
            CommandKind::Play => false,
            CommandKind::Pause => true,
            CommandKind::Seek => self.player.is_paused(),
        };

        if let Some(state) = self.phase.state_mut() {
            state.record_playback(&local_id, position_ms, paused);
        }
        self.publish_roster();
        Ok(())
    }

    fn local_buffering(&mut self, is_buffering: bool) {
        let Some(state) = self.phase.state_mut() else {
            return;
        };
        let local_id = state.local_participant_id().to_string();
        if !state.set_buffering(&local_id, is_buffering) {
            return;
        }
        debug!("Local buffering: {}", is_buffering);

        if let Err(e) = self.send(&ClientMessage::BufferingStatus { is_buffering }) {
            debug!("Buffering status not sent: {}", e);
        }
        self.publish_roster();
    }

    /// Periodic position report while in a session
    fn report_status(&mut self) {
        let Some(state) = self.phase.state_mut() else {
            return;
        };
        let local_id = state.local_participant_id().to_string();
        let position_ms = position_to_ms(self.player.current_position());
        let paused = self.player.is_paused();
        state.record_playback(&local_id, position_ms, paused);

        if let Err(e) = self.send(&ClientMessage::PlaybackStatus { position_ms, paused }) {
            debug!("Playback status not sent: {}", e);
        }
        self.refresh_snapshot();
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::State(state) => self.set_connection(state),
            TransportEvent::Reconnected => self.resume_session(),
            TransportEvent::Message(message) => self.handle_server_message(message).await,
            TransportEvent::Malformed(detail) => {
                warn!("Ignoring frame: {}", SessionError::Protocol(detail));
            }
            TransportEvent::GaveUp(reason) => self.connection_lost(reason).await,
        }
    }

    /// Re-attach to the session after a reconnect
    fn resume_session(&mut self) {
        let Some(state) = self.phase.state() else {
            return;
        };
        let message = ClientMessage::Resume {
            session_id: state.session_id().to_string(),
            participant_id: state.local_participant_id().to_string(),
        };
        info!("Resuming session {}", state.session_id());
        if let Err(e) = self.send(&message) {
            warn!("Could not resume session: {}", e);
        }
    }

    async fn open_relay(&mut self) -> Result<(), SessionError> {
        self.close_relay().await;
        self.set_connection(ConnectionState::Connecting);

        let url = self.config.websocket_url();
        let transport = self.config.platform.transport.clone();
        match RelayClient::connect(transport, &url, ConnectionSettings::from(&self.config)).await {
            Ok((client, events)) => {
                self.relay = Some(RelayLink { client, events });
                Ok(())
            }
            Err(e) => {
                warn!("Could not reach the relay: {}", e);
                self.set_connection(ConnectionState::Disconnected);
                Err(e.into())
            }
        }
    }

    async fn close_relay(&mut self) {
        if let Some(mut link) = self.relay.take() {
            link.client.disconnect().await;
        }
        self.set_connection(ConnectionState::Disconnected);
    }

    pub(super) fn send(&self, message: &ClientMessage) -> Result<(), SessionError> {
        let relay = self.relay.as_ref().ok_or(SessionError::NotConnected)?;
        relay.client.send(message)?;
        Ok(())
    }

    pub(super) fn set_phase(&mut self, phase: SessionPhase) {
        let kind = phase.kind();
        let changed = kind != self.phase.kind();
        self.phase = phase;
        if changed {
            debug!("Phase: {:?}", kind);
            self.emit(SessionEvent::PhaseChanged(kind));
        }
        self.refresh_snapshot();
    }

    fn set_connection(&mut self, state: ConnectionState) {
        if self.connection == state {
            return;
        }
        self.connection = state;
        self.emit(SessionEvent::ConnectionChanged(state));
        self.refresh_snapshot();
    }

    pub(super) fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Push the roster to observers
    pub(super) fn publish_roster(&self) {
        let roster = self.phase.state().map(|s| s.roster()).unwrap_or_default();
        self.refresh_snapshot();
        self.emit(SessionEvent::RosterChanged(roster));
    }

    pub(super) fn refresh_snapshot(&self) {
        let state = self.phase.state();
        self.snapshot.send_replace(SessionSnapshot {
            phase: self.phase.kind(),
            connection: self.connection,
            session: state.map(|s| s.info()),
            participants: state.map(|s| s.roster()).unwrap_or_default(),
            local_participant_id: state.map(|s| s.local_participant_id().to_string()),
        });
    }
}

async fn next_transport_event(relay: Option<&mut RelayLink>) -> Option<TransportEvent> {
    match relay {
        Some(link) => link.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Milliseconds since the UNIX epoch
pub(super) fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

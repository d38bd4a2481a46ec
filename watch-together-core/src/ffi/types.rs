//! FFI types exposed via uniffi

use crate::network::ConnectionState;
use crate::sync::{
    CommandKind as InternalCommandKind, ControlMode as InternalControlMode, EndReason,
    JoinFailureReason, Participant as InternalParticipant, PhaseKind, Role, SessionError,
    SessionInfo as InternalSessionInfo,
};

/// Error types exposed via FFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CoreError {
    #[error("Relay is not reachable: {0}")]
    RelayUnreachable(String),

    #[error("Could not create session: {0}")]
    SessionCreateFailed(String),

    #[error("Could not join session: {reason:?}")]
    SessionJoinFailed { reason: JoinFailure },

    #[error("Not connected to the relay")]
    NotConnected,

    #[error("Not permitted: {0}")]
    PermissionDenied(String),

    #[error("Not in a session")]
    NotInSession,

    #[error("Not the host")]
    NotHost,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Session has shut down")]
    Shutdown,

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<SessionError> for CoreError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Unreachable(detail) => CoreError::RelayUnreachable(detail),
            SessionError::SessionCreateFailed(detail) => CoreError::SessionCreateFailed(detail),
            SessionError::SessionJoinFailed { reason } => CoreError::SessionJoinFailed {
                reason: reason.into(),
            },
            SessionError::NotConnected => CoreError::NotConnected,
            SessionError::PermissionDenied(kind) => CoreError::PermissionDenied(kind.to_string()),
            SessionError::Protocol(detail) => CoreError::ProtocolError(detail),
            SessionError::NotInSession => CoreError::NotInSession,
            SessionError::NotHost => CoreError::NotHost,
            SessionError::Cancelled => CoreError::Cancelled,
            SessionError::Shutdown => CoreError::Shutdown,
        }
    }
}

/// Who may control playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum ControlMode {
    HostOnly,
    Anyone,
}

impl From<ControlMode> for InternalControlMode {
    fn from(m: ControlMode) -> Self {
        match m {
            ControlMode::HostOnly => InternalControlMode::HostOnly,
            ControlMode::Anyone => InternalControlMode::Anyone,
        }
    }
}

impl From<InternalControlMode> for ControlMode {
    fn from(m: InternalControlMode) -> Self {
        match m {
            InternalControlMode::HostOnly => ControlMode::HostOnly,
            InternalControlMode::Anyone => ControlMode::Anyone,
        }
    }
}

/// Why a join was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum JoinFailure {
    InvalidCode,
    Full,
    Expired,
    TimedOut,
    Refused,
}

impl From<JoinFailureReason> for JoinFailure {
    fn from(r: JoinFailureReason) -> Self {
        match r {
            JoinFailureReason::InvalidCode => JoinFailure::InvalidCode,
            JoinFailureReason::Full => JoinFailure::Full,
            JoinFailureReason::Expired => JoinFailure::Expired,
            JoinFailureReason::TimedOut => JoinFailure::TimedOut,
            JoinFailureReason::Refused => JoinFailure::Refused,
        }
    }
}

/// Relay connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

impl From<ConnectionState> for ConnectionStatus {
    fn from(s: ConnectionState) -> Self {
        match s {
            ConnectionState::Disconnected => ConnectionStatus::Disconnected,
            ConnectionState::Connecting => ConnectionStatus::Connecting,
            ConnectionState::Connected => ConnectionStatus::Connected,
            ConnectionState::Reconnecting { attempt } => ConnectionStatus::Reconnecting { attempt },
        }
    }
}

/// Where the session state machine stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum PhaseState {
    Idle,
    Creating,
    Joining,
    Hosting,
    Guest,
    Leaving,
}

impl From<PhaseKind> for PhaseState {
    fn from(k: PhaseKind) -> Self {
        match k {
            PhaseKind::Idle => PhaseState::Idle,
            PhaseKind::Creating => PhaseState::Creating,
            PhaseKind::Joining => PhaseState::Joining,
            PhaseKind::Active { role: Role::Host } => PhaseState::Hosting,
            PhaseKind::Active { role: Role::Guest } => PhaseState::Guest,
            PhaseKind::Leaving => PhaseState::Leaving,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum CommandKind {
    Play,
    Pause,
    Seek,
}

impl From<InternalCommandKind> for CommandKind {
    fn from(k: InternalCommandKind) -> Self {
        match k {
            InternalCommandKind::Play => CommandKind::Play,
            InternalCommandKind::Pause => CommandKind::Pause,
            InternalCommandKind::Seek => CommandKind::Seek,
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum SessionEndReason {
    HostEnded,
    ConnectionLost,
}

impl From<EndReason> for SessionEndReason {
    fn from(r: EndReason) -> Self {
        match r {
            EndReason::HostEnded => SessionEndReason::HostEnded,
            EndReason::ConnectionLost => SessionEndReason::ConnectionLost,
        }
    }
}

/// Participant exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub is_host: bool,
    pub is_buffering: bool,
    pub position_ms: u64,
    pub paused: bool,
}

impl From<&InternalParticipant> for Participant {
    fn from(p: &InternalParticipant) -> Self {
        Self {
            id: p.id.clone(),
            display_name: p.display_name.clone(),
            is_host: p.is_host,
            is_buffering: p.is_buffering,
            position_ms: p.position_ms,
            paused: p.paused,
        }
    }
}

/// Session description exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct SessionInfo {
    pub session_id: String,
    pub control_mode: ControlMode,
    pub created_at_ms: u64,
}

impl From<InternalSessionInfo> for SessionInfo {
    fn from(s: InternalSessionInfo) -> Self {
        Self {
            session_id: s.session_id,
            control_mode: s.control_mode.into(),
            created_at_ms: s.created_at_ms,
        }
    }
}

/// Startup configuration passed in by the shell
#[derive(Debug, Clone, uniffi::Record)]
pub struct SessionConfig {
    /// Relay base URL; empty keeps the built-in default
    pub relay_url: String,
    /// Name shown to others; `None` picks a platform default
    pub display_name: Option<String>,
    pub is_tv: bool,
}

/// Callback interface for session events
#[uniffi::export(callback_interface)]
pub trait SessionCallback: Send + Sync {
    fn on_phase_changed(&self, phase: PhaseState);
    fn on_connection_changed(&self, status: ConnectionStatus);
    fn on_participants_changed(&self, participants: Vec<Participant>);
    /// A remote participant's command was applied to the local player
    fn on_remote_command(&self, kind: CommandKind, position_ms: u64, by_participant: String);
    fn on_session_ended(&self, reason: SessionEndReason);
    fn on_error(&self, message: String);
}

/// The shell's media player, driven by the core
#[uniffi::export(callback_interface)]
pub trait PlayerCallback: Send + Sync {
    fn current_position_ms(&self) -> u64;
    fn is_paused(&self) -> bool;
    fn seek_to_ms(&self, position_ms: u64);
    fn play(&self);
    fn pause(&self);
}

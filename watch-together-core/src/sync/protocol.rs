//! Relay Protocol Messages

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Who may issue playback commands in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ControlMode {
    /// Only the host controls playback
    HostOnly,
    /// Every participant controls playback
    Anyone,
}

/// Kind of playback command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommandKind {
    Play,
    Pause,
    Seek,
}

impl CommandKind {
    pub const ALL: [CommandKind; 3] = [CommandKind::Play, CommandKind::Pause, CommandKind::Seek];
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Play => "play",
            CommandKind::Pause => "pause",
            CommandKind::Seek => "seek",
        };
        f.write_str(name)
    }
}

/// A playback command with its target position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackCommand {
    pub kind: CommandKind,
    pub position: Duration,
}

/// Participant in a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Stable peer identifier assigned by the relay
    pub id: String,
    /// Display name chosen by the user
    pub display_name: String,
    /// Whether this participant is the session host
    #[serde(default)]
    pub is_host: bool,
    /// Whether the participant's player is buffering
    #[serde(default)]
    pub is_buffering: bool,
    /// Last known playback position in milliseconds
    #[serde(default)]
    pub position_ms: u64,
    /// Last known paused flag
    #[serde(default = "default_paused")]
    pub paused: bool,
}

fn default_paused() -> bool {
    true
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, is_host: bool) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_host,
            is_buffering: false,
            position_ms: 0,
            paused: true,
        }
    }
}

/// Session description sent to joiners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub session_id: String,
    pub control_mode: ControlMode,
    /// Creation time in milliseconds since UNIX epoch
    #[serde(default)]
    pub created_at_ms: u64,
}

/// Messages sent from the client to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Open a new session with us as host
    CreateSession {
        control_mode: ControlMode,
        display_name: String,
    },
    /// Join an existing session by code
    JoinSession {
        session_id: String,
        display_name: String,
    },
    /// Rebind a new connection to our existing seat after a reconnect
    Resume {
        session_id: String,
        participant_id: String,
    },
    /// Playback command to relay to everyone else
    PlaybackCommand { kind: CommandKind, position_ms: u64 },
    /// Our player started or stopped buffering
    BufferingStatus { is_buffering: bool },
    /// Periodic report of our player's position
    PlaybackStatus { position_ms: u64, paused: bool },
    /// Leave the session
    LeaveSession,
    /// End the session for everyone (host only)
    EndSession,
}

/// Messages sent from the relay to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Session created, we are its host
    SessionCreated {
        session_id: String,
        participant: Participant,
    },
    /// Join accepted
    SessionJoined {
        session: SessionDescriptor,
        participant_id: String,
        roster: Vec<Participant>,
    },
    /// Request refused
    Error { reason: String },
    /// Full roster (sent on membership changes and after resume)
    RosterUpdate { participants: Vec<Participant> },
    /// Playback command issued by another participant
    PlaybackCommand {
        kind: CommandKind,
        position_ms: u64,
        by_participant: String,
    },
    /// Buffering state of another participant
    BufferingStatus {
        participant_id: String,
        is_buffering: bool,
    },
    /// Position report of another participant
    PlaybackStatus {
        participant_id: String,
        position_ms: u64,
        paused: bool,
    },
    /// The session is over
    SessionEnded {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl ServerMessage {
    /// Check if this message only makes sense inside an active session
    pub fn requires_session(&self) -> bool {
        matches!(
            self,
            ServerMessage::RosterUpdate { .. }
                | ServerMessage::PlaybackCommand { .. }
                | ServerMessage::BufferingStatus { .. }
                | ServerMessage::PlaybackStatus { .. }
                | ServerMessage::SessionEnded { .. }
        )
    }
}

/// Why the relay turned down a join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinFailureReason {
    /// No session with that code
    InvalidCode,
    /// Session at capacity
    Full,
    /// Session no longer running
    Expired,
    /// Relay never answered
    TimedOut,
    /// Any other refusal
    Refused,
}

impl JoinFailureReason {
    /// Map a relay reason code
    pub fn from_code(code: &str) -> Self {
        match code {
            "invalidCode" | "invalid_code" | "notFound" => JoinFailureReason::InvalidCode,
            "full" => JoinFailureReason::Full,
            "expired" => JoinFailureReason::Expired,
            _ => JoinFailureReason::Refused,
        }
    }
}

impl fmt::Display for JoinFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            JoinFailureReason::InvalidCode => "invalid session code",
            JoinFailureReason::Full => "session is full",
            JoinFailureReason::Expired => "session has expired",
            JoinFailureReason::TimedOut => "relay did not answer",
            JoinFailureReason::Refused => "relay refused the request",
        };
        f.write_str(text)
    }
}

/// Convert a millisecond wire position
pub fn position_from_ms(position_ms: u64) -> Duration {
    Duration::from_millis(position_ms)
}

/// Convert a position to its millisecond wire form
pub fn position_to_ms(position: Duration) -> u64 {
    position.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_shape() {
        let msg = ClientMessage::CreateSession {
            control_mode: ControlMode::HostOnly,
            display_name: "Ana".to_string(),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "createSession");
        assert_eq!(json["controlMode"], "hostOnly");
        assert_eq!(json["displayName"], "Ana");

        let json = serde_json::to_value(&ClientMessage::LeaveSession).unwrap();
        assert_eq!(json["type"], "leaveSession");
    }

    #[test]
    fn test_server_playback_command_parse() {
        let raw = r#"{"type":"playbackCommand","kind":"seek","positionMs":120000,"byParticipant":"p2"}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(
            msg,
            ServerMessage::PlaybackCommand {
                kind: CommandKind::Seek,
                position_ms: 120_000,
                by_participant: "p2".to_string(),
            }
        );
        assert!(msg.requires_session());
    }

    #[test]
    fn test_participant_defaults() {
        let raw = r#"{"id":"p1","displayName":"Bo"}"#;
        let p: Participant = serde_json::from_str(raw).unwrap();
        assert!(!p.is_host);
        assert!(!p.is_buffering);
        assert!(p.paused);
        assert_eq!(p.position_ms, 0);
    }

    #[test]
    fn test_session_ended_without_reason() {
        let msg: ServerMessage = serde_json::from_str(r#"{"type":"sessionEnded"}"#).unwrap();
        assert_eq!(msg, ServerMessage::SessionEnded { reason: None });
    }

    #[test]
    fn test_join_failure_codes() {
        assert_eq!(JoinFailureReason::from_code("invalidCode"), JoinFailureReason::InvalidCode);
        assert_eq!(JoinFailureReason::from_code("full"), JoinFailureReason::Full);
        assert_eq!(JoinFailureReason::from_code("expired"), JoinFailureReason::Expired);
        assert_eq!(JoinFailureReason::from_code("banana"), JoinFailureReason::Refused);
    }
}

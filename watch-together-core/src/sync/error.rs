//! Session errors surfaced to the UI

use thiserror::Error;

use super::protocol::{CommandKind, JoinFailureReason};
use crate::network::NetworkError;

/// Everything a session operation can fail with
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("relay unreachable: {0}")]
    Unreachable(String),

    #[error("could not create session: {0}")]
    SessionCreateFailed(String),

    #[error("could not join session: {reason}")]
    SessionJoinFailed { reason: JoinFailureReason },

    #[error("not connected to the relay")]
    NotConnected,

    #[error("{0} is not permitted in this session")]
    PermissionDenied(CommandKind),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not in a session")]
    NotInSession,

    #[error("only the host can do that")]
    NotHost,

    #[error("request cancelled")]
    Cancelled,

    #[error("session coordinator has shut down")]
    Shutdown,
}

impl From<NetworkError> for SessionError {
    fn from(e: NetworkError) -> Self {
        match e {
            NetworkError::Unreachable(detail) => SessionError::Unreachable(detail),
            NetworkError::NotConnected => SessionError::NotConnected,
            NetworkError::Protocol(detail) => SessionError::Protocol(detail),
        }
    }
}

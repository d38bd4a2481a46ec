//! Command Authority
//!
//! Decides who may drive playback. The same check runs before a local command
//! is sent and before a remote command reaches the player; senders are never
//! trusted to have enforced it themselves.

use super::protocol::{CommandKind, ControlMode};

/// Outcome of an authority check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

/// Check whether a requester may issue a playback command
pub fn authorize(control_mode: ControlMode, requester_is_host: bool, kind: CommandKind) -> Decision {
    match (control_mode, requester_is_host, kind) {
        (ControlMode::Anyone, _, _) => Decision::Allow,
        (ControlMode::HostOnly, true, _) => Decision::Allow,
        (ControlMode::HostOnly, false, CommandKind::Play | CommandKind::Pause | CommandKind::Seek) => {
            Decision::Deny
        }
    }
}

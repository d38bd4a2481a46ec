//! Session State Management

use std::collections::HashMap;

use thiserror::Error;
use tracing::warn;

use super::protocol::{ControlMode, Participant, SessionDescriptor};
use crate::network::SessionCode;

/// Roster updates that would break the session's invariants
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RosterError {
    #[error("roster has no host")]
    NoHost,

    #[error("roster does not include the local participant {0}")]
    MissingLocal(String),
}

/// Public description of the current session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub control_mode: ControlMode,
    pub created_at_ms: u64,
}

/// Our role in an active session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Guest,
}

/// Observable phase of the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseKind {
    #[default]
    Idle,
    Creating,
    Joining,
    Active { role: Role },
    Leaving,
}

/// State of an active session
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Shareable session code
    session_id: String,
    /// Fixed for the lifetime of the session
    control_mode: ControlMode,
    /// Creation time in milliseconds since UNIX epoch
    created_at_ms: u64,
    /// Our participant ID
    local_participant_id: String,
    /// Current host's participant ID
    host_participant_id: String,
    /// All participants including ourselves
    participants: HashMap<String, Participant>,
}

impl SessionState {
    /// Create a new session state for a host
    pub fn new_as_host(
        session_id: String,
        control_mode: ControlMode,
        created_at_ms: u64,
        mut local: Participant,
    ) -> Self {
        local.is_host = true;
        let local_participant_id = local.id.clone();

        let mut participants = HashMap::new();
        participants.insert(local_participant_id.clone(), local);

        Self {
            session_id,
            control_mode,
            created_at_ms,
            local_participant_id: local_participant_id.clone(),
            host_participant_id: local_participant_id,
            participants,
        }
    }

    /// Create the state for a guest from the relay's join answer
    pub fn from_join(
        session: SessionDescriptor,
        local_participant_id: String,
        roster: Vec<Participant>,
    ) -> Result<Self, RosterError> {
        let mut state = Self {
            session_id: session.session_id,
            control_mode: session.control_mode,
            created_at_ms: session.created_at_ms,
            local_participant_id,
            host_participant_id: String::new(),
            participants: HashMap::new(),
        };
        state.apply_roster(roster)?;

        if !state.participants.contains_key(&state.local_participant_id) {
            return Err(RosterError::MissingLocal(state.local_participant_id));
        }
        Ok(state)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn control_mode(&self) -> ControlMode {
        self.control_mode
    }

    pub fn local_participant_id(&self) -> &str {
        &self.local_participant_id
    }

    pub fn host_participant_id(&self) -> &str {
        &self.host_participant_id
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            control_mode: self.control_mode,
            created_at_ms: self.created_at_ms,
        }
    }

    /// Check if we are the host
    pub fn is_host(&self) -> bool {
        self.local_participant_id == self.host_participant_id
    }

    pub fn role(&self) -> Role {
        if self.is_host() {
            Role::Host
        } else {
            Role::Guest
        }
    }

    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Get list of participants (host first, then others sorted by display name)
    pub fn participant_list(&self) -> Vec<&Participant> {
        let mut list: Vec<&Participant> = self.participants.values().collect();
        list.sort_by(|a, b| match (a.is_host, b.is_host) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a
                .display_name
                .to_lowercase()
                .cmp(&b.display_name.to_lowercase())
                .then_with(|| a.id.cmp(&b.id)),
        });
        list
    }

    /// Owned copy of the participant list
    pub fn roster(&self) -> Vec<Participant> {
        self.participant_list().into_iter().cloned().collect()
    }

    /// Replace the roster with the relay's view.
    ///
    /// Duplicate ids collapse with the last entry winning. Host resolution
    /// keeps exactly one host: the current host stays host while it is listed
    /// as one (or listed without any host flag at all), otherwise the first
    /// listed claimant takes over. A roster with no candidate is rejected and
    /// leaves the state untouched.
    pub fn apply_roster(&mut self, roster: Vec<Participant>) -> Result<(), RosterError> {
        let mut order: Vec<String> = Vec::with_capacity(roster.len());
        let mut incoming: HashMap<String, Participant> = HashMap::with_capacity(roster.len());
        for participant in roster {
            if !incoming.contains_key(&participant.id) {
                order.push(participant.id.clone());
            }
            incoming.insert(participant.id.clone(), participant);
        }

        let claimants: Vec<&String> = order.iter().filter(|id| incoming[*id].is_host).collect();

        let host = if claimants.iter().any(|id| **id == self.host_participant_id) {
            self.host_participant_id.clone()
        } else if let Some(first) = claimants.first() {
            if claimants.len() > 1 {
                warn!("Roster lists {} hosts, picking {}", claimants.len(), first);
            }
            (*first).clone()
        } else if incoming.contains_key(&self.host_participant_id) {
            self.host_participant_id.clone()
        } else {
            return Err(RosterError::NoHost);
        };

        for (id, participant) in incoming.iter_mut() {
            participant.is_host = *id == host;
        }

        self.host_participant_id = host;
        self.participants = incoming;
        Ok(())
    }

    /// Update a participant's buffering flag
    pub fn set_buffering(&mut self, participant_id: &str, is_buffering: bool) -> bool {
        match self.participants.get_mut(participant_id) {
            Some(p) => {
                p.is_buffering = is_buffering;
                true
            }
            None => false,
        }
    }

    /// Record a participant's last known playback state
    pub fn record_playback(&mut self, participant_id: &str, position_ms: u64, paused: bool) -> bool {
        match self.participants.get_mut(participant_id) {
            Some(p) => {
                p.position_ms = position_ms;
                p.paused = paused;
                true
            }
            None => false,
        }
    }
}

/// Where the local client stands with respect to a session
#[derive(Debug, Default)]
pub enum SessionPhase {
    /// Not in any session
    #[default]
    Idle,
    /// Waiting for the relay to confirm a new session
    Creating { control_mode: ControlMode },
    /// Waiting for the relay to accept a join
    Joining { code: SessionCode },
    /// In an active session
    Active(SessionState),
    /// Tearing the session down
    Leaving,
}

impl SessionPhase {
    /// Check if we're in an active session
    pub fn is_active(&self) -> bool {
        matches!(self, SessionPhase::Active(_))
    }

    /// Check if we're idle
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionPhase::Idle)
    }

    /// Get the active session state if we're in one
    pub fn state(&self) -> Option<&SessionState> {
        match self {
            SessionPhase::Active(state) => Some(state),
            _ => None,
        }
    }

    /// Get mutable reference to active session state
    pub fn state_mut(&mut self) -> Option<&mut SessionState> {
        match self {
            SessionPhase::Active(state) => Some(state),
            _ => None,
        }
    }

    pub fn kind(&self) -> PhaseKind {
        match self {
            SessionPhase::Idle => PhaseKind::Idle,
            SessionPhase::Creating { .. } => PhaseKind::Creating,
            SessionPhase::Joining { .. } => PhaseKind::Joining,
            SessionPhase::Active(state) => PhaseKind::Active { role: state.role() },
            SessionPhase::Leaving => PhaseKind::Leaving,
        }
    }
}

//! Relay message handlers

use tracing::{debug, info, warn};

use super::authority::authorize;
use super::coordinator::{current_time_ms, Coordinator, EndReason, SessionEvent};
use super::error::SessionError;
use super::protocol::{
    position_from_ms, CommandKind, JoinFailureReason, Participant, PlaybackCommand,
    ServerMessage, SessionDescriptor,
};
use super::state::{SessionPhase, SessionState};
use crate::player::apply_remote_command;

impl Coordinator {
    /// Handle a decoded message from the relay
    pub(super) async fn handle_server_message(&mut self, message: ServerMessage) {
        if message.requires_session() && !self.phase.is_active() {
            debug!("Discarding message outside an active session: {:?}", message);
            return;
        }

        match message {
            ServerMessage::SessionCreated {
                session_id,
                participant,
            } => self.on_session_created(session_id, participant).await,

            ServerMessage::SessionJoined {
                session,
                participant_id,
                roster,
            } => self.on_session_joined(session, participant_id, roster).await,

            ServerMessage::Error { reason } => self.on_relay_error(reason).await,

            ServerMessage::RosterUpdate { participants } => {
                let Some(state) = self.phase.state_mut() else {
                    return;
                };
                match state.apply_roster(participants) {
                    Ok(()) => self.publish_roster(),
                    Err(e) => warn!("Dropping roster update: {}", SessionError::Protocol(e.to_string())),
                }
            }

            ServerMessage::PlaybackCommand {
                kind,
                position_ms,
                by_participant,
            } => self.on_remote_command(kind, position_ms, by_participant),

            ServerMessage::BufferingStatus {
                participant_id,
                is_buffering,
            } => {
                let changed = self
                    .phase
                    .state_mut()
                    .is_some_and(|state| state.set_buffering(&participant_id, is_buffering));
                if changed {
                    debug!("{} buffering: {}", participant_id, is_buffering);
                    self.publish_roster();
                }
            }

            ServerMessage::PlaybackStatus {
                participant_id,
                position_ms,
                paused,
            } => {
                let known = self
                    .phase
                    .state_mut()
                    .is_some_and(|state| state.record_playback(&participant_id, position_ms, paused));
                if known {
                    self.publish_roster();
                } else {
                    debug!("Status from unknown participant {}", participant_id);
                }
            }

            ServerMessage::SessionEnded { reason } => {
                info!(
                    "Session ended by the relay: {}",
                    reason.as_deref().unwrap_or("host ended the session")
                );
                self.leave_current().await;
                self.emit(SessionEvent::SessionEnded {
                    reason: EndReason::HostEnded,
                });
            }
        }
    }

    async fn on_session_created(&mut self, session_id: String, participant: Participant) {
        let SessionPhase::Creating { control_mode } = self.phase else {
            debug!("Unexpected session creation for {}", session_id);
            return;
        };

        let state = SessionState::new_as_host(session_id, control_mode, current_time_ms(), participant);
        let info = state.info();
        info!("Created session {} as host", info.session_id);

        let pending = self.pending.take();
        self.set_phase(SessionPhase::Active(state));
        self.publish_roster();
        if let Some(pending) = pending {
            let _ = pending.reply.send(Ok(info));
        }
    }

    async fn on_session_joined(
        &mut self,
        session: SessionDescriptor,
        participant_id: String,
        roster: Vec<Participant>,
    ) {
        let SessionPhase::Joining { code } = &self.phase else {
            debug!("Unexpected join answer for {}", session.session_id);
            return;
        };
        if code.as_str() != session.session_id {
            warn!("Asked to join {} but the relay answered for {}", code, session.session_id);
        }

        match SessionState::from_join(session, participant_id, roster) {
            Ok(state) => {
                let info = state.info();
                info!(
                    "Joined session {} with {} participant(s)",
                    info.session_id,
                    state.participant_count()
                );

                let pending = self.pending.take();
                self.set_phase(SessionPhase::Active(state));
                self.publish_roster();
                if let Some(pending) = pending {
                    let _ = pending.reply.send(Ok(info));
                }
            }
            Err(e) => {
                warn!("Unusable join answer: {}", SessionError::Protocol(e.to_string()));
                self.fail_pending(SessionError::SessionJoinFailed {
                    reason: JoinFailureReason::Refused,
                })
                .await;
            }
        }
    }

    async fn on_relay_error(&mut self, reason: String) {
        match self.phase {
            SessionPhase::Creating { .. } => {
                self.fail_pending(SessionError::SessionCreateFailed(reason)).await;
            }
            SessionPhase::Joining { .. } => {
                self.fail_pending(SessionError::SessionJoinFailed {
                    reason: JoinFailureReason::from_code(&reason),
                })
                .await;
            }
            SessionPhase::Active(_) => warn!("Relay reported an error: {}", reason),
            _ => debug!("Relay error outside a session: {}", reason),
        }
    }

    /// Apply a playback command from another participant, if they may issue it
    fn on_remote_command(&mut self, kind: CommandKind, position_ms: u64, by: String) {
        let Some(state) = self.phase.state_mut() else {
            return;
        };
        if by == state.local_participant_id() {
            debug!("Ignoring echo of our own {}", kind);
            return;
        }
        let Some(sender) = state.participant(&by) else {
            warn!("Dropping {} from unknown participant {}", kind, by);
            return;
        };
        if !authorize(state.control_mode(), sender.is_host, kind).is_allowed() {
            warn!("Dropping {} from {}: only the host controls playback", kind, by);
            return;
        }

        let paused = match kind {
            CommandKind::Play => false,
            CommandKind::Pause => true,
            CommandKind::Seek => sender.paused,
        };
        state.record_playback(&by, position_ms, paused);

        let command = PlaybackCommand {
            kind,
            position: position_from_ms(position_ms),
        };
        debug!("Applying {} to {:?} from {}", kind, command.position, by);
        apply_remote_command(self.player.as_ref(), command);

        self.emit(SessionEvent::RemoteCommandApplied { command, by });
        self.publish_roster();
    }
}

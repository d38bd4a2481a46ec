//! Session implementation for FFI

use std::sync::{Arc, Once};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::runtime::Runtime;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use crate::config::{Platform, SyncConfig};
use crate::health::HealthMonitor;
use crate::sync::{SessionEvent, SessionHandle};

use super::player::ForeignPlayer;
use super::types::*;

/// How long dropping the session waits for the relay to hear we left
const CLOSE_GRACE: Duration = Duration::from_secs(2);

static TRACING_INIT: Once = Once::new();

type SharedCallback = Arc<RwLock<Option<Arc<dyn SessionCallback>>>>;

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let mut filter = tracing_subscriber::EnvFilter::from_default_env();
        for directive in ["watch_together_core=debug", "hyper_util=off", "hyper=off", "reqwest=off"] {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        tracing_subscriber::fmt()
            .with_ansi(false) // Xcode and logcat show raw escapes
            .with_target(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    });
}

/// Main session interface
#[derive(uniffi::Object)]
pub struct WatchTogetherSession {
    runtime: Runtime,
    handle: SessionHandle,
    player: Arc<ForeignPlayer>,
    health: HealthMonitor,
    callback: SharedCallback,
    is_tv: bool,
}

#[uniffi::export]
impl WatchTogetherSession {
    /// Create a new session around the shell's player
    #[uniffi::constructor]
    pub fn new(config: SessionConfig, player: Box<dyn PlayerCallback>) -> Result<Arc<Self>, CoreError> {
        init_tracing();
        info!("Initializing watch-together session");

        let sync_config = build_sync_config(config);
        debug!("Relay at {}, display name {:?}", sync_config.relay_url, sync_config.display_name);

        let runtime = Runtime::new().map_err(|e| CoreError::Runtime(e.to_string()))?;
        let player = Arc::new(ForeignPlayer::new(player));
        let health = HealthMonitor::new(&sync_config);
        let is_tv = sync_config.platform.is_tv;

        let handle = {
            let _guard = runtime.enter();
            SessionHandle::start(sync_config, player.clone())
        };

        let callback: SharedCallback = Arc::new(RwLock::new(None));
        runtime.spawn(forward_events(handle.subscribe(), Arc::clone(&callback)));

        Ok(Arc::new(Self {
            runtime,
            handle,
            player,
            health,
            callback,
            is_tv,
        }))
    }

    /// Set the event callback
    pub fn set_callback(&self, callback: Box<dyn SessionCallback>) {
        *self.callback.write() = Some(Arc::from(callback));
    }

    /// Probe the relay's health endpoint
    pub fn check_relay_health(&self) -> bool {
        self.runtime.block_on(self.health.probe()).is_healthy()
    }

    /// Create a session and become its host; returns the shareable code
    pub fn create_session(&self, control_mode: ControlMode) -> Result<SessionInfo, CoreError> {
        let result = self
            .runtime
            .block_on(self.handle.create_session(control_mode.into()));
        match &result {
            Ok(info) => info!("Hosting session {}", info.session_id),
            Err(e) => warn!("create_session failed: {}", e),
        }
        Ok(result?.into())
    }

    /// Join a session by its code
    pub fn join_session(&self, code: String) -> Result<SessionInfo, CoreError> {
        let result = self.runtime.block_on(self.handle.join_session(&code));
        match &result {
            Ok(info) => info!("Joined session {}", info.session_id),
            Err(e) => warn!("join_session failed: {}", e),
        }
        Ok(result?.into())
    }

    /// Leave the current session (no-op when idle)
    pub fn leave_session(&self) -> Result<(), CoreError> {
        Ok(self.runtime.block_on(self.handle.leave_session())?)
    }

    /// End the session for everyone (host only)
    pub fn end_session(&self) -> Result<(), CoreError> {
        Ok(self.runtime.block_on(self.handle.end_session())?)
    }

    pub fn play(&self) -> Result<(), CoreError> {
        Ok(self.runtime.block_on(self.handle.play())?)
    }

    pub fn pause(&self) -> Result<(), CoreError> {
        Ok(self.runtime.block_on(self.handle.pause())?)
    }

    pub fn seek(&self, position_ms: u64) -> Result<(), CoreError> {
        let position = Duration::from_millis(position_ms);
        Ok(self.runtime.block_on(self.handle.seek(position))?)
    }

    /// Called by the shell when its player starts or stops buffering
    pub fn report_buffering(&self, is_buffering: bool) {
        self.player.report_buffering(is_buffering);
    }

    /// Current session, if any
    pub fn get_session(&self) -> Option<SessionInfo> {
        self.handle.session().map(SessionInfo::from)
    }

    /// Participants, host first
    pub fn participants(&self) -> Vec<Participant> {
        self.handle.participants().iter().map(Participant::from).collect()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.handle.snapshot().connection.into()
    }

    pub fn is_host(&self) -> bool {
        self.handle.is_host()
    }

    pub fn is_in_session(&self) -> bool {
        self.handle.is_in_session()
    }

    pub fn participant_count(&self) -> u32 {
        self.handle.participant_count() as u32
    }

    pub fn is_tv(&self) -> bool {
        self.is_tv
    }
}

impl Drop for WatchTogetherSession {
    fn drop(&mut self) {
        // Guests only hear the session ended if endSession goes out before
        // the runtime is torn down
        self.runtime.block_on(self.handle.close(CLOSE_GRACE));
    }
}

/// Defaults, then `WATCH_TOGETHER_*` overrides, then what the shell passed
fn build_sync_config(config: SessionConfig) -> SyncConfig {
    let mut sync_config = SyncConfig::with_platform(Platform::native(config.is_tv)).with_env_overrides();
    if !config.relay_url.trim().is_empty() {
        sync_config.relay_url = config.relay_url.trim().to_string();
    }
    if let Some(name) = config.display_name.filter(|n| !n.trim().is_empty()) {
        sync_config.display_name = name.trim().to_string();
    }
    sync_config
}

/// Relay coordinator events to the foreign callback
async fn forward_events(mut events: broadcast::Receiver<SessionEvent>, callback: SharedCallback) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("Callback fell behind, skipped {} events", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let Some(cb) = callback.read().clone() else {
            continue;
        };
        match event {
            SessionEvent::PhaseChanged(phase) => cb.on_phase_changed(phase.into()),
            SessionEvent::ConnectionChanged(state) => cb.on_connection_changed(state.into()),
            SessionEvent::RosterChanged(roster) => {
                cb.on_participants_changed(roster.iter().map(Participant::from).collect())
            }
            SessionEvent::RemoteCommandApplied { command, by } => cb.on_remote_command(
                command.kind.into(),
                crate::sync::position_to_ms(command.position),
                by,
            ),
            SessionEvent::SessionEnded { reason } => cb.on_session_ended(reason.into()),
            SessionEvent::Failed(error) => cb.on_error(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_config_wins_over_defaults() {
        let config = build_sync_config(SessionConfig {
            relay_url: " http://10.0.0.2:8080 ".to_string(),
            display_name: Some("Den".to_string()),
            is_tv: true,
        });
        assert_eq!(config.relay_url, "http://10.0.0.2:8080");
        assert_eq!(config.display_name, "Den");
        assert!(config.platform.is_tv);
    }

    #[test]
    fn test_blank_display_name_keeps_platform_default() {
        std::env::remove_var(crate::config::DISPLAY_NAME_ENV);
        let config = build_sync_config(SessionConfig {
            relay_url: String::new(),
            display_name: Some("  ".to_string()),
            is_tv: true,
        });
        assert_eq!(config.display_name, "Living Room TV");
    }
}

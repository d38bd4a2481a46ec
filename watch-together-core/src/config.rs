//! Runtime configuration
//!
//! Everything the core needs to know at startup: where the relay lives, how
//! patient to be with it, and which platform capabilities were selected.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::network::{Transport, WebSocketTransport};

/// Default relay base URL
const DEFAULT_RELAY_URL: &str = "https://relay.watch-together.app";

/// Environment variable overriding the relay base URL
pub const RELAY_URL_ENV: &str = "WATCH_TOGETHER_RELAY_URL";

/// Environment variable overriding the display name
pub const DISPLAY_NAME_ENV: &str = "WATCH_TOGETHER_DISPLAY_NAME";

/// Bounded wait for a relay connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a create/join request waits for the relay's answer
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Overall budget for the health probe
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the local playback status is reported while in a session
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Reconnection is abandoned after this long without a connection
const RECONNECT_GIVE_UP_AFTER: Duration = Duration::from_secs(120);

/// Exponential backoff settings for reconnection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// First delay
    pub base: Duration,
    /// Upper bound for a single delay (before jitter)
    pub cap: Duration,
    /// Relative jitter applied to each delay, e.g. 0.2 for ±20%
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

/// Platform capabilities, selected once at process start
#[derive(Clone)]
pub struct Platform {
    /// Connection factory for the relay
    pub transport: Arc<dyn Transport>,
    /// Running on a TV-class device (remote-control UI)
    pub is_tv: bool,
}

impl Platform {
    /// Native platform with the WebSocket transport
    pub fn native(is_tv: bool) -> Self {
        Self {
            transport: Arc::new(WebSocketTransport::new()),
            is_tv,
        }
    }

    /// Platform with a custom transport
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            is_tv: false,
        }
    }

    /// Display name used when the user hasn't picked one
    pub fn default_display_name(&self) -> &'static str {
        if self.is_tv {
            "Living Room TV"
        } else {
            "Guest"
        }
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("is_tv", &self.is_tv)
            .finish_non_exhaustive()
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::native(false)
    }
}

/// Configuration for a watch-together session coordinator
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Relay base URL (http or https)
    pub relay_url: String,
    /// Name shown to other participants
    pub display_name: String,
    /// Selected platform capabilities
    pub platform: Platform,
    /// Bounded wait for each connection attempt
    pub connect_timeout: Duration,
    /// How long create/join waits for the relay's answer
    pub request_timeout: Duration,
    /// Overall budget for the health probe
    pub health_timeout: Duration,
    /// Reconnection backoff
    pub backoff: BackoffConfig,
    /// Give up reconnecting after this long
    pub reconnect_give_up_after: Duration,
    /// How often local playback status is reported while in a session
    pub status_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::with_platform(Platform::default())
    }
}

impl SyncConfig {
    /// Default settings on top of the given platform
    pub fn with_platform(platform: Platform) -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            display_name: platform.default_display_name().to_string(),
            platform,
            connect_timeout: CONNECT_TIMEOUT,
            request_timeout: REQUEST_TIMEOUT,
            health_timeout: HEALTH_TIMEOUT,
            backoff: BackoffConfig::default(),
            reconnect_give_up_after: RECONNECT_GIVE_UP_AFTER,
            status_interval: STATUS_INTERVAL,
        }
    }

    /// Default settings with environment overrides applied
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `WATCH_TOGETHER_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(RELAY_URL_ENV) {
            if !url.trim().is_empty() {
                self.relay_url = url.trim().to_string();
            }
        }
        if let Ok(name) = std::env::var(DISPLAY_NAME_ENV) {
            if !name.trim().is_empty() {
                self.display_name = name.trim().to_string();
            }
        }
        self
    }

    /// Relay base URL without a trailing slash
    fn base_url(&self) -> &str {
        self.relay_url.trim_end_matches('/')
    }

    /// URL of the relay's health endpoint
    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url())
    }

    /// URL for the persistent relay connection (http(s) mapped to ws(s))
    pub fn websocket_url(&self) -> String {
        let base = self.base_url();
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        }
    }
}

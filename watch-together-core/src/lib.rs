//! Watch Together - Core Library
//!
//! This library keeps a local media player in step with the other members of
//! a shared viewing session, coordinated through a relay service.

pub mod config;
pub mod ffi;
pub mod health;
pub mod network;
pub mod player;
pub mod sync;

// Re-exports for convenience
pub use config::{Platform, SyncConfig};
pub use health::{HealthMonitor, HealthStatus};
pub use player::PlaybackBridge;
pub use sync::{SessionError, SessionEvent, SessionHandle, SessionSnapshot};

// Setup uniffi scaffolding
uniffi::setup_scaffolding!();

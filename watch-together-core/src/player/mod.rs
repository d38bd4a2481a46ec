//! Playback Bridge
//!
//! The media player is owned by the host application; the core drives it
//! through the [`PlaybackBridge`] trait.

mod bridge;

pub use bridge::{apply_remote_command, BufferingListener, PlaybackBridge, SEEK_TOLERANCE};

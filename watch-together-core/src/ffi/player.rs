//! Playback bridge backed by the shell's player callback

use std::time::Duration;

use parking_lot::Mutex;

use super::types::PlayerCallback;
use crate::player::{BufferingListener, PlaybackBridge};
use crate::sync::{position_from_ms, position_to_ms};

/// Adapts a foreign [`PlayerCallback`] to [`PlaybackBridge`].
///
/// Buffering is pushed in by the shell through
/// [`ForeignPlayer::report_buffering`].
pub struct ForeignPlayer {
    callback: Box<dyn PlayerCallback>,
    listener: Mutex<Option<BufferingListener>>,
}

impl ForeignPlayer {
    pub fn new(callback: Box<dyn PlayerCallback>) -> Self {
        Self {
            callback,
            listener: Mutex::new(None),
        }
    }

    /// Forward a buffering change to the subscribed listener
    pub fn report_buffering(&self, is_buffering: bool) {
        if let Some(listener) = self.listener.lock().as_ref() {
            listener(is_buffering);
        }
    }
}

impl PlaybackBridge for ForeignPlayer {
    fn current_position(&self) -> Duration {
        position_from_ms(self.callback.current_position_ms())
    }

    fn is_paused(&self) -> bool {
        self.callback.is_paused()
    }

    fn seek_to(&self, position: Duration) {
        self.callback.seek_to_ms(position_to_ms(position));
    }

    fn play(&self) {
        self.callback.play();
    }

    fn pause(&self) {
        self.callback.pause();
    }

    fn subscribe_buffering(&self, listener: BufferingListener) {
        *self.listener.lock() = Some(listener);
    }
}

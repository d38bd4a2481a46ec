//! Player interface consumed by the sync engine

use std::time::Duration;

use tracing::debug;

use crate::sync::{CommandKind, PlaybackCommand};

/// Remote play/pause only re-seek when we are further off than this
pub const SEEK_TOLERANCE: Duration = Duration::from_secs(1);

/// Called with `true` when the player starts buffering and `false` when it stops
pub type BufferingListener = Box<dyn Fn(bool) + Send + Sync>;

/// The local media player
pub trait PlaybackBridge: Send + Sync {
    /// Current playback position
    fn current_position(&self) -> Duration;

    /// Whether playback is paused
    fn is_paused(&self) -> bool;

    /// Jump to a position
    fn seek_to(&self, position: Duration);

    /// Start or resume playback
    fn play(&self);

    /// Pause playback
    fn pause(&self);

    /// Register for buffering changes; replaces any earlier listener
    fn subscribe_buffering(&self, listener: BufferingListener);
}

/// Apply an authorized remote command to the player.
///
/// Play and pause line the position up first when we have drifted past
/// [`SEEK_TOLERANCE`]; seek always seeks.
pub fn apply_remote_command(player: &dyn PlaybackBridge, command: PlaybackCommand) {
    match command.kind {
        CommandKind::Seek => player.seek_to(command.position),
        CommandKind::Play => {
            align(player, command.position);
            player.play();
        }
        CommandKind::Pause => {
            player.pause();
            align(player, command.position);
        }
    }
}

fn align(player: &dyn PlaybackBridge, target: Duration) {
    let current = player.current_position();
    let drift = if current > target {
        current - target
    } else {
        target - current
    };
    if drift > SEEK_TOLERANCE {
        debug!("Drift {:?} over tolerance, seeking to {:?}", drift, target);
        player.seek_to(target);
    }
}

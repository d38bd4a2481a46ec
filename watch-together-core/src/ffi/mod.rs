//! FFI bindings for native UI integration
//!
//! This module provides the interface exposed via uniffi to Swift/Kotlin.

mod player;
mod session;
mod types;

pub use player::ForeignPlayer;
pub use session::*;
pub use types::*;

//! Sync Engine
//!
//! Session state, playback authority, and the coordinator task that keeps the
//! local player in step with the rest of the session.

mod authority;
mod coordinator;
mod error;
mod handlers;
mod protocol;
mod state;

pub use authority::*;
pub use coordinator::*;
pub use error::*;
pub use protocol::*;
pub use state::*;

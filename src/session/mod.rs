//! Terminal sessions.
//!
//! This module provides the session bridge that connects one websocket to
//! one pty-backed shell, plus the identifiers, state machine and counters
//! that go with it.

mod bridge;
mod id;
mod state;
mod tracker;

pub use bridge::{host_name, CloseReason, Session, SessionBridge};
pub use id::SessionId;
pub use state::SessionState;
pub use tracker::{ActiveSession, SessionTracker};

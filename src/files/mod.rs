//! File service.
//!
//! Sandboxed list/read/write operations plus change notifications for
//! watched directories.

mod sandbox;
mod service;
mod watcher;

pub use sandbox::Sandbox;
pub use service::{client_message, FileOutcome, FileService};
pub use watcher::{ConnectionId, WatchBroker, WatchHandle};

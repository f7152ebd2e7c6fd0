//! # conduit
//!
//! Local access daemon that exposes the user's shell and a sandboxed part of
//! the filesystem to a browser-based client.
//!
//! A web application connects over websockets and acts as a full terminal
//! and file editor for the machine the daemon runs on. Every connection is
//! authorized by the same three-tier policy: origin allow-list, loopback
//! exemption, shared API key.
//!
//! ## Features
//!
//! - **Terminal sessions**: one pty-backed shell per websocket, with resize
//!   and prompt working-directory reporting
//! - **File service**: list/read/write inside one root directory, over REST
//!   or a persistent connection with change notifications
//! - **Authorization**: origin allow-list, loopback exemption, API key
//! - **Cross-platform PTY**: Unix PTY and Windows ConPTY via portable-pty
//!
//! ## Quick Start
//!
//! ```no_run
//! use conduit::{api, AppState, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> conduit::Result<()> {
//!     conduit::logging::try_init().ok();
//!
//!     let config = Config::default();
//!     let state = AppState::from_config(&config, None, CancellationToken::new())?;
//!     api::serve_with_state(config.to_server_config()?, state).await
//! }
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod files;
pub mod idle;
pub mod install;
pub mod logging;
pub mod pty;
pub mod security;
pub mod session;
pub mod shutdown;

// Re-export commonly used types
pub use api::{AppState, ServerConfig};
pub use config::Config;
pub use error::{ConduitError, Result};
pub use files::{FileService, Sandbox, WatchBroker};
pub use pty::{NativePty, ProcessHandle, PtySize};
pub use security::{AuthPolicy, AuthRequest};
pub use session::{SessionBridge, SessionId, SessionState, SessionTracker};

//! API layer for conduit.
//!
//! This module provides the HTTP and WebSocket surface of the daemon.
//!
//! ## Endpoints
//!
//! ### Sessions and files (authorized)
//! - `WS /terminal` - One interactive shell per connection
//! - `WS /files` - List/read/write/watch over a persistent connection
//! - `GET /files?path=` - Directory listing or base64 file content
//! - `POST /files?path=` - Write the request body to a file
//!
//! ### Health
//! - `GET /up`, `GET /health` - Status, version, uptime, active sessions
//!
//! ### Administration (loopback only)
//! - `/kill`, `/install-user`, `/install-service`, `/uninstall`
//!
//! ## Example
//!
//! ```no_run
//! use conduit::api::{serve_with_state, AppState, ServerConfig};
//! use conduit::files::Sandbox;
//! use conduit::security::AuthPolicy;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> conduit::Result<()> {
//!     let policy = AuthPolicy::new(["http://localhost"], None);
//!     let state = AppState::new(policy, Sandbox::new(".")?, CancellationToken::new())?;
//!     serve_with_state(ServerConfig::new("127.0.0.1", 3022), state).await
//! }
//! ```

pub mod handlers;
pub mod router;
pub mod types;
pub mod websocket;

// Re-export commonly used types
pub use handlers::AppState;
pub use router::{create_router_with_state, serve_listener, serve_with_state, ServerConfig};
pub use types::{
    ErrorResponse, FileData, FileEntry, FileRequest, FileResponse, StatusResponse, TerminalInput,
    TerminalOutput,
};

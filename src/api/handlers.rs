//! REST API handlers.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::types::{ErrorResponse, StatusResponse};
use crate::config::Config;
use crate::error::{ConduitError, Result};
use crate::files::{client_message, FileService, Sandbox, WatchBroker};
use crate::idle::ActivityTracker;
use crate::install::{AdminFailure, Installer, LocalInstaller};
use crate::pty::default_shell;
use crate::security::AuthPolicy;
use crate::session::{SessionBridge, SessionTracker};
use crate::shutdown::{cancel_after, KILL_DELAY};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub policy: Arc<AuthPolicy>,
    pub files: Arc<FileService>,
    pub watcher: WatchBroker,
    pub bridge: SessionBridge,
    pub sessions: Arc<SessionTracker>,
    pub activity: Arc<ActivityTracker>,
    pub installer: Arc<dyn Installer>,
    pub shutdown: CancellationToken,
    pub started: Instant,
    /// `/kill` is refused when idle shutdown is disabled (service mode).
    pub kill_enabled: bool,
}

impl AppState {
    /// Build the state for one sandbox root. Starts the filesystem watcher,
    /// so this must run inside a tokio runtime.
    ///
    /// Terminal sessions start in the sandbox root with the default shell.
    pub fn new(policy: AuthPolicy, sandbox: Sandbox, shutdown: CancellationToken) -> Result<Self> {
        let watcher = WatchBroker::start()?;
        let sessions = Arc::new(SessionTracker::new());
        let bridge = SessionBridge::new(
            default_shell(),
            sandbox.root(),
            Arc::clone(&sessions),
            shutdown.clone(),
        );

        Ok(Self {
            policy: Arc::new(policy),
            files: Arc::new(FileService::new(sandbox)),
            watcher,
            bridge,
            sessions,
            activity: Arc::new(ActivityTracker::new()),
            installer: Arc::new(LocalInstaller::new()),
            shutdown,
            started: Instant::now(),
            kill_enabled: true,
        })
    }

    /// Build the state from loaded configuration and the effective key.
    pub fn from_config(
        config: &Config,
        api_key: Option<String>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let sandbox = Sandbox::new(config.file_root())?;
        let state = Self::new(config.auth_policy(api_key), sandbox, shutdown)?
            .with_terminal(config.shell(), config.terminal_cwd())
            .with_kill_enabled(config.idle.enabled);
        Ok(state)
    }

    /// Shell program and starting directory for new sessions.
    pub fn with_terminal(mut self, shell: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        self.bridge = SessionBridge::new(
            shell,
            cwd,
            Arc::clone(&self.sessions),
            self.shutdown.clone(),
        );
        self
    }

    pub fn with_installer(mut self, installer: impl Installer + 'static) -> Self {
        self.installer = Arc::new(installer);
        self
    }

    pub fn with_kill_enabled(mut self, enabled: bool) -> Self {
        self.kill_enabled = enabled;
        self
    }

    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            status: "running".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started.elapsed().as_secs_f64(),
            active_connections: self.sessions.active_count(),
            is_installed: self.installer.is_installed(),
        }
    }
}

/// Health check endpoint.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.status())
}

/// Graceful shutdown request.
pub async fn kill(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if !state.kill_enabled {
        warn!("Refused /kill: idle shutdown is disabled");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Kill command is disabled when running with --no-idle-shutdown.",
        );
    }
    info!("Received /kill request. Shutting down.");
    cancel_after(state.shutdown.clone(), KILL_DELAY);
    (StatusCode::OK, "Conduit server is shutting down.")
}

pub async fn install_user(State(state): State<AppState>) -> (StatusCode, String) {
    run_admin(state.installer, |i| i.install_user()).await
}

pub async fn install_service(State(state): State<AppState>) -> (StatusCode, String) {
    run_admin(state.installer, |i| i.install_service()).await
}

pub async fn uninstall(State(state): State<AppState>) -> (StatusCode, String) {
    run_admin(state.installer, |i| i.uninstall()).await
}

async fn run_admin<F>(installer: Arc<dyn Installer>, action: F) -> (StatusCode, String)
where
    F: FnOnce(&dyn Installer) -> std::result::Result<String, AdminFailure> + Send + 'static,
{
    match tokio::task::spawn_blocking(move || action(installer.as_ref())).await {
        Ok(Ok(message)) => (StatusCode::OK, message),
        Ok(Err(failure)) => (StatusCode::INTERNAL_SERVER_ERROR, failure.message),
        Err(e) => {
            error!("Administrative action panicked: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error".to_string(),
            )
        }
    }
}

/// `?path=` of the REST file calls.
#[derive(Debug, Default, Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub path: String,
}

/// `GET /files?path=`: listing for a directory, base64 content for a file.
pub async fn read_file(state: &AppState, path: &str) -> Response {
    match state.files.fetch(path).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `POST /files?path=`: the raw body becomes the file content.
pub async fn write_file(state: &AppState, path: &str, body: Bytes) -> Response {
    match state.files.write_bytes(path, &body).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => error_response(&e),
    }
}

fn error_response(err: &ConduitError) -> Response {
    let status = match err {
        ConduitError::Forbidden => StatusCode::FORBIDDEN,
        ConduitError::Io(e) if e.kind() == ErrorKind::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorResponse::new(client_message(err)))).into_response()
}

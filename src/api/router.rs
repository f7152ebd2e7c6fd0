//! API router configuration.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{any, get},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{install_service, install_user, kill, status, uninstall, AppState};
use super::websocket::{files_handler, terminal_handler};
use crate::error::Result;
use crate::idle::record_activity;
use crate::security::{gatekeeper, loopback_only, AuthPolicy, KEY_HEADER};

/// Create the API router with the given state.
pub fn create_router_with_state(state: AppState) -> Router {
    // Terminal and file endpoints share one authorization path
    let guarded = Router::new()
        .route("/terminal", get(terminal_handler))
        .route(
            "/files",
            get(files_handler)
                .post(files_handler)
                .layer(DefaultBodyLimit::disable()),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.policy),
            gatekeeper,
        ));

    let admin = Router::new()
        .route("/kill", any(kill))
        .route("/install-user", any(install_user))
        .route("/install-service", any(install_service))
        .route("/uninstall", any(uninstall))
        .route_layer(middleware::from_fn(loopback_only))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.policy),
            gatekeeper,
        ));

    Router::new()
        .route("/up", get(status))
        .route("/health", get(status))
        .merge(guarded)
        .merge(admin)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.activity),
            record_activity,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.policy))
        .with_state(state)
}

/// CORS for the allow-listed origins. Preflights are answered here, before
/// any authorization runs.
pub fn cors_layer(policy: &AuthPolicy) -> CorsLayer {
    let origins: Vec<HeaderValue> = policy
        .allowed_origins()
        .iter()
        .filter(|o| o.as_str() != "*")
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(KEY_HEADER)])
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn bind_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3022,
        }
    }
}

/// Bind and serve until the state's shutdown token fires.
///
/// A bind failure is returned immediately.
pub async fn serve_with_state(config: ServerConfig, state: AppState) -> Result<()> {
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Conduit v{} listening on {}", env!("CARGO_PKG_VERSION"), addr);
    serve_listener(listener, state).await
}

/// Serve on an already bound listener.
pub async fn serve_listener(listener: tokio::net::TcpListener, state: AppState) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let router = create_router_with_state(state);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3022);
        assert_eq!(config.bind_address(), "127.0.0.1:3022");
    }

    #[test]
    fn test_server_config_custom() {
        let config = ServerConfig::new("0.0.0.0", 8080);
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_server_config_ipv6() {
        let config = ServerConfig::new("::1", 3022);
        assert_eq!(config.bind_address(), "[::1]:3022");
    }

    #[test]
    fn test_cors_layer_ignores_wildcard() {
        let policy = AuthPolicy::new(["*", "https://ok.dev"], None);
        let _layer = cors_layer(&policy);
    }
}

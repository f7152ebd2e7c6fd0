//! Configuration management for conduit.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::ServerConfig;
use crate::cli::Args;
use crate::security::AuthPolicy;

/// Origins trusted out of the box.
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "https://cadence.jakbox.dev",
    "https://cadence.jakbox.net",
    "https://code.jakbox.dev",
    "https://code.jakbox.net",
    "http://localhost:8083",
    "http://localhost",
];

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerSection,
    /// Authorization configuration.
    pub security: SecuritySection,
    /// File service configuration.
    pub files: FilesSection,
    /// Terminal session configuration.
    pub terminal: TerminalSection,
    /// Idle shutdown configuration.
    pub idle: IdleSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3022,
        }
    }
}

/// Authorization configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    /// Exact `Origin` values that are always trusted.
    pub allowed_origins: Vec<String>,
    /// Shared secret for origin-less, non-loopback clients. When unset the
    /// persisted key file is consulted.
    pub api_key: Option<String>,
    /// Location of the persisted key. Defaults to the user config dir.
    pub key_file: Option<PathBuf>,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|o| o.to_string())
                .collect(),
            api_key: None,
            key_file: None,
        }
    }
}

/// File service configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesSection {
    /// Sandbox root. Defaults to the home directory.
    pub root: Option<PathBuf>,
}

/// Terminal configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalSection {
    /// Shell program. Defaults to `$SHELL` (Unix) or PowerShell (Windows).
    pub shell: Option<String>,
    /// Starting directory. Defaults to the home directory.
    pub cwd: Option<PathBuf>,
}

/// Idle shutdown configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleSection {
    pub enabled: bool,
    pub timeout_secs: u64,
}

impl Default for IdleSection {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 3600,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or a full filter.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("CONDUIT_HOST") {
            self.server.host = host;
        }

        if let Some(port) = var("CONDUIT_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Some(root) = var("CONDUIT_ROOT").filter(|r| !r.is_empty()) {
            self.files.root = Some(PathBuf::from(root));
        }

        if let Some(key) = var("CONDUIT_API_KEY").filter(|k| !k.is_empty()) {
            self.security.api_key = Some(key);
        }

        if let Some(origins) = var("CONDUIT_ALLOWED_ORIGINS") {
            self.security.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(level) = var("CONDUIT_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }

        if let Some(ref root) = args.root {
            self.files.root = Some(root.clone());
        }

        if let Some(ref key) = args.api_key {
            self.security.api_key = Some(key.clone());
        }

        if args.no_idle_shutdown {
            self.idle.enabled = false;
        }

        if args.debug {
            self.logging.level = crate::logging::DEBUG_FILTER.to_string();
        } else if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(ref path) = args.config {
            config = Config::from_file(path)?;
        }

        config.apply_env();
        config.apply_args(args);

        Ok(config)
    }

    /// Convert to ServerConfig for the API server.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;

        Ok(ServerConfig::new(host.to_string(), self.server.port))
    }

    /// Authorization policy for the given effective key.
    pub fn auth_policy(&self, api_key: Option<String>) -> AuthPolicy {
        AuthPolicy::new(self.security.allowed_origins.iter().cloned(), api_key)
    }

    /// Sandbox root: configured, else home, else the current directory.
    pub fn file_root(&self) -> PathBuf {
        self.files.root.clone().unwrap_or_else(home_or_current)
    }

    /// Starting directory for new terminal sessions.
    pub fn terminal_cwd(&self) -> PathBuf {
        self.terminal.cwd.clone().unwrap_or_else(home_or_current)
    }

    pub fn shell(&self) -> String {
        self.terminal
            .shell
            .clone()
            .unwrap_or_else(crate::pty::default_shell)
    }

    /// `None` when idle shutdown is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle
            .enabled
            .then(|| Duration::from_secs(self.idle.timeout_secs))
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

fn home_or_current() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// JSON parsing error.
    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
    /// Invalid host address.
    #[error("invalid host address: {0}")]
    InvalidHost(String),
}

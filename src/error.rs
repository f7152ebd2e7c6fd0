//! Error types for conduit.

use thiserror::Error;

/// Main error type for conduit operations.
#[derive(Error, Debug)]
pub enum ConduitError {
    /// PTY-related error (open, spawn, clone of the master side).
    #[error("PTY error: {0}")]
    Pty(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A client path resolved outside the sandbox root.
    ///
    /// Displays as the bare word so it can be sent to clients as-is.
    #[error("Forbidden")]
    Forbidden,

    /// Transport-encoded payload could not be decoded.
    #[error("Invalid base64 content")]
    InvalidEncoding,

    /// Filesystem watcher failure.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Invalid session state transition attempted.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: crate::session::SessionState,
        to: crate::session::SessionState,
    },

    /// Internal lock was poisoned.
    #[error("internal lock poisoned")]
    LockPoisoned,

    /// Channel receive error.
    #[error("channel closed")]
    ChannelClosed,

    /// Configuration could not be loaded or applied.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// An install, uninstall or service action failed.
    #[error("{0}")]
    Admin(#[from] crate::install::AdminFailure),

    /// The operation is not available on this platform.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Convenience Result type for conduit operations.
pub type Result<T> = std::result::Result<T, ConduitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_display_hides_path() {
        let err = ConduitError::Forbidden;
        assert_eq!(err.to_string(), "Forbidden");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ConduitError = io_err.into();
        assert!(matches!(err, ConduitError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_pty_error_display() {
        let err = ConduitError::Pty("failed to spawn".into());
        assert!(err.to_string().contains("PTY error"));
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[test]
    fn test_invalid_encoding_display() {
        assert_eq!(
            ConduitError::InvalidEncoding.to_string(),
            "Invalid base64 content"
        );
    }

    #[test]
    fn test_unsupported_display() {
        let err = ConduitError::Unsupported("service install".into());
        assert!(err.to_string().contains("service install"));
    }
}

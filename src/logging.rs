//! Logging initialization and configuration.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when no level is configured.
pub const DEFAULT_FILTER: &str = "conduit=info";

/// Filter used when the daemon runs with `--debug`.
pub const DEBUG_FILTER: &str = "conduit=debug,tower_http=debug";

fn env_or_default() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the logging system from the configured filter.
///
/// `RUST_LOG` is already folded into the configuration, so the filter is
/// used as given. A bare level such as `debug` is scoped to this crate so
/// dependencies stay quiet; an unparsable filter falls back to the default.
///
/// # Panics
///
/// Panics if another tracing subscriber has already been set.
pub fn init_with_filter(filter: &str) {
    let filter = EnvFilter::try_new(scoped_filter(filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}

/// Try to initialize the logging system.
///
/// Returns `Ok(())` if successful, or `Err` if logging has already been
/// initialized.
pub fn try_init() -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(env_or_default())
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
}

/// Expand a bare level (`info`, `debug`, ...) into a crate-scoped directive.
fn scoped_filter(filter: &str) -> String {
    match filter {
        "error" | "warn" | "info" | "debug" | "trace" => format!("conduit={filter}"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_init_idempotent() {
        let _ = try_init();
        let _ = try_init();
    }

    #[test]
    fn test_scoped_filter() {
        assert_eq!(scoped_filter("debug"), "conduit=debug");
        assert_eq!(scoped_filter("conduit=trace,axum=info"), "conduit=trace,axum=info");
        assert_eq!(scoped_filter(DEBUG_FILTER), DEBUG_FILTER);
    }

    #[test]
    fn test_logging_works() {
        let _ = try_init();

        tracing::info!("test info message");
        tracing::debug!("test debug message");
        tracing::warn!("test warn message");
    }
}

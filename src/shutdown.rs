//! Process-wide shutdown signal.
//!
//! One [`CancellationToken`] is shared by the HTTP server, every terminal
//! session (through child tokens) and the idle monitor.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::session::SessionTracker;

/// Delay between a `/kill` request and shutdown, so the reply goes out.
pub const KILL_DELAY: Duration = Duration::from_millis(100);

/// Cancel `token` on Ctrl-C. Returns early if it is cancelled elsewhere.
pub async fn watch_ctrl_c(token: CancellationToken) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => {
                warn!("Unable to listen for Ctrl-C: {}", e);
                return;
            }
        },
        _ = token.cancelled() => return,
    }
    token.cancel();
}

/// Cancel `token` after `delay` without blocking the caller.
pub fn cancel_after(token: CancellationToken, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        token.cancel();
    });
}

/// Wait for open terminal sessions to tear down after shutdown was
/// signalled. Returns false if some were still open at `timeout`.
pub async fn drain_sessions(sessions: &SessionTracker, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while sessions.active_count() > 0 {
        if tokio::time::Instant::now() >= deadline {
            warn!(
                "{} terminal sessions still open at shutdown",
                sessions.active_count()
            );
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    true
}

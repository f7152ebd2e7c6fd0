//! Inactivity tracking and automatic shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::session::SessionTracker;

/// How often the monitor re-evaluates idleness.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Time of the most recent request.
#[derive(Debug)]
pub struct ActivityTracker {
    epoch: Instant,
    last_millis: AtomicU64,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_millis: AtomicU64::new(0),
        }
    }

    /// Record activity now.
    pub fn touch(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_millis.fetch_max(now, Ordering::Relaxed);
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_millis.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(last)
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Middleware stamping every request as activity.
pub async fn record_activity(
    State(activity): State<Arc<ActivityTracker>>,
    request: Request,
    next: Next,
) -> Response {
    activity.touch();
    next.run(request).await
}

/// Shuts the daemon down once nothing has happened for `timeout` and no
/// terminal session is open.
#[derive(Debug, Clone)]
pub struct IdleMonitor {
    activity: Arc<ActivityTracker>,
    sessions: Arc<SessionTracker>,
    timeout: Duration,
    interval: Duration,
}

impl IdleMonitor {
    pub fn new(
        activity: Arc<ActivityTracker>,
        sessions: Arc<SessionTracker>,
        timeout: Duration,
    ) -> Self {
        Self {
            activity,
            sessions,
            timeout,
            interval: CHECK_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn should_shut_down(&self) -> bool {
        self.sessions.active_count() == 0 && self.activity.idle_for() >= self.timeout
    }

    /// Check periodically until idle or until `shutdown` fires elsewhere.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => return,
            }

            if self.should_shut_down() {
                info!(
                    "Shutting down due to inactivity for over {}s",
                    self.timeout.as_secs()
                );
                shutdown.cancel();
                return;
            }
            debug!(
                "Idle check: {}s idle, {} active sessions",
                self.activity.idle_for().as_secs(),
                self.sessions.active_count()
            );
        }
    }
}

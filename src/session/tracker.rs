//! Session counters shared by the bridge, the health endpoint and the idle
//! monitor.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::SessionId;

/// Lock-free session bookkeeping.
#[derive(Debug)]
pub struct SessionTracker {
    next_id: AtomicU64,
    active: AtomicUsize,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            active: AtomicUsize::new(0),
        }
    }

    /// Allocate the next session id.
    pub fn next_id(&self) -> SessionId {
        SessionId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of sessions currently in the `Active` or `Closing` state.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Count a session as active until the returned guard is dropped.
    pub fn activate(self: &Arc<Self>) -> ActiveSession {
        self.active.fetch_add(1, Ordering::SeqCst);
        ActiveSession {
            tracker: Arc::clone(self),
        }
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a session counted as active; decrements on drop.
#[derive(Debug)]
pub struct ActiveSession {
    tracker: Arc<SessionTracker>,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let tracker = SessionTracker::new();
        let mut seen = HashSet::new();
        let mut last = SessionId::from_raw(0);
        for _ in 0..1_000 {
            let id = tracker.next_id();
            assert!(id > last);
            assert!(seen.insert(id));
            last = id;
        }
    }

    #[test]
    fn test_active_guard() {
        let tracker = Arc::new(SessionTracker::new());
        assert_eq!(tracker.active_count(), 0);

        let a = tracker.activate();
        let b = tracker.activate();
        assert_eq!(tracker.active_count(), 2);

        drop(a);
        assert_eq!(tracker.active_count(), 1);
        drop(b);
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn test_concurrent_ids() {
        let tracker = Arc::new(SessionTracker::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || (0..250).map(|_| tracker.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id));
            }
        }
        assert_eq!(all.len(), 1_000);
    }
}

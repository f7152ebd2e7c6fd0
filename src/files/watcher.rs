//! Watch broker.
//!
//! One filesystem watcher for the whole process, shared by every file
//! connection. Each connection subscribes to directories; every event is
//! delivered as a `notify` response to the connections subscribed to the
//! event's parent directory.
//!
//! A directory is registered with the watcher once, however many
//! connections subscribe to it, and unregistered when its last subscriber
//! disconnects. The subscriber registry and the watcher sit behind separate
//! locks; the registry lock is never held across a watcher call.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::api::types::FileResponse;
use crate::error::{ConduitError, Result};

/// Identity of one file connection within the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

struct Subscriber {
    outbox: mpsc::Sender<FileResponse>,
    /// Absolute directory -> the path as the client spelled it.
    dirs: HashMap<PathBuf, String>,
}

struct Registry {
    subscribers: HashMap<ConnectionId, Subscriber>,
    /// Absolute directory -> number of subscribing connections.
    watched: HashMap<PathBuf, usize>,
}

/// The watcher and the directories it currently has registered.
struct WatchSource {
    watcher: RecommendedWatcher,
    active: HashSet<PathBuf>,
}

struct Inner {
    registry: Mutex<Registry>,
    source: Mutex<WatchSource>,
    next_id: AtomicU64,
}

/// Shared handle to the broker.
#[derive(Clone)]
pub struct WatchBroker {
    inner: Arc<Inner>,
}

impl WatchBroker {
    /// Create the filesystem watcher and spawn the dispatch task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start() -> Result<Self> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // receiver gone means the broker is gone
            let _ = events_tx.send(res);
        })?;

        let inner = Arc::new(Inner {
            registry: Mutex::new(Registry {
                subscribers: HashMap::new(),
                watched: HashMap::new(),
            }),
            source: Mutex::new(WatchSource {
                watcher,
                active: HashSet::new(),
            }),
            next_id: AtomicU64::new(1),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(res) = events_rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                match res {
                    Ok(event) => WatchBroker { inner }.dispatch(&event),
                    Err(e) => warn!("File watcher error: {}", e),
                }
            }
            debug!("Watch dispatch loop ended");
        });

        Ok(Self { inner })
    }

    /// Register a connection. Notifications are pushed into `outbox`; the
    /// subscription ends when the returned handle is dropped.
    pub fn connect(&self, outbox: mpsc::Sender<FileResponse>) -> Result<WatchHandle> {
        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registry = self.lock()?;
        registry.subscribers.insert(
            id,
            Subscriber {
                outbox,
                dirs: HashMap::new(),
            },
        );
        Ok(WatchHandle {
            id,
            broker: self.clone(),
        })
    }

    /// Subscribe `conn` to changes directly inside `dir`.
    ///
    /// The first subscription to a directory registers it with the watcher
    /// on the blocking pool. A failed registration leaves no trace.
    pub async fn subscribe(&self, conn: ConnectionId, dir: &Path, label: &str) -> Result<()> {
        let first = {
            let mut guard = self.lock()?;
            let registry = &mut *guard;

            let Some(subscriber) = registry.subscribers.get_mut(&conn) else {
                return Err(ConduitError::ChannelClosed);
            };
            if subscriber.dirs.contains_key(dir) {
                return Ok(());
            }
            subscriber.dirs.insert(dir.to_path_buf(), label.to_string());

            let count = registry.watched.entry(dir.to_path_buf()).or_insert(0);
            *count += 1;
            *count == 1
        };
        if !first {
            return Ok(());
        }

        let broker = self.clone();
        let path = dir.to_path_buf();
        let registered = tokio::task::spawn_blocking(move || broker.reconcile(&path))
            .await
            .unwrap_or_else(|e| Err(ConduitError::Io(std::io::Error::other(e))));

        if registered.is_err() {
            self.remove_subscription(conn, dir);
        }
        registered
    }

    /// Drop every subscription of `conn`, unwatching directories nobody
    /// else subscribes to.
    pub fn unsubscribe(&self, conn: ConnectionId) {
        let released: Vec<PathBuf> = {
            let Ok(mut guard) = self.lock() else { return };
            let registry = &mut *guard;

            let Some(subscriber) = registry.subscribers.remove(&conn) else {
                return;
            };
            subscriber
                .dirs
                .into_keys()
                .filter(|dir| release(&mut registry.watched, dir))
                .collect()
        };

        for dir in released {
            if let Err(e) = self.reconcile(&dir) {
                trace!("Unwatch {}: {}", dir.display(), e);
            }
        }
    }

    /// Forget one subscription whose registration failed.
    fn remove_subscription(&self, conn: ConnectionId, dir: &Path) {
        let Ok(mut guard) = self.lock() else { return };
        let registry = &mut *guard;
        let removed = registry
            .subscribers
            .get_mut(&conn)
            .and_then(|s| s.dirs.remove(dir))
            .is_some();
        if removed {
            release(&mut registry.watched, dir);
        }
    }

    /// Bring the watcher in line with the registry for `dir`.
    ///
    /// Calls are serialized by the watcher lock and always read the latest
    /// registry state, so concurrent subscribe and unsubscribe converge.
    fn reconcile(&self, dir: &Path) -> Result<()> {
        let mut source = self
            .inner
            .source
            .lock()
            .map_err(|_| ConduitError::LockPoisoned)?;
        let wanted = self.lock()?.watched.contains_key(dir);

        match (wanted, source.active.contains(dir)) {
            (true, false) => {
                source.watcher.watch(dir, RecursiveMode::NonRecursive)?;
                source.active.insert(dir.to_path_buf());
                debug!("Watching {}", dir.display());
            }
            (false, true) => {
                source.active.remove(dir);
                debug!("Stopped watching {}", dir.display());
                // the directory may already be gone
                source.watcher.unwatch(dir)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Number of directories with at least one subscriber.
    pub fn watched_count(&self) -> usize {
        self.lock().map(|r| r.watched.len()).unwrap_or(0)
    }

    /// Number of directories currently registered with the watcher.
    pub fn registered_count(&self) -> usize {
        self.inner
            .source
            .lock()
            .map(|s| s.active.len())
            .unwrap_or(0)
    }

    /// Number of connected file clients.
    pub fn connection_count(&self) -> usize {
        self.lock().map(|r| r.subscribers.len()).unwrap_or(0)
    }

    fn dispatch(&self, event: &Event) {
        let Some(kind) = event_kind_name(&event.kind) else {
            return;
        };
        let parents: BTreeSet<&Path> = event.paths.iter().filter_map(|p| p.parent()).collect();
        if parents.is_empty() {
            return;
        }

        let Ok(registry) = self.lock() else { return };
        for (id, subscriber) in &registry.subscribers {
            for parent in &parents {
                let Some(label) = subscriber.dirs.get(*parent) else {
                    continue;
                };
                // never block while holding the registry lock
                match subscriber.outbox.try_send(FileResponse::notify(label.as_str(), kind)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!("File connection {} is behind; dropping notify", id.0);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Registry>> {
        self.inner
            .registry
            .lock()
            .map_err(|_| ConduitError::LockPoisoned)
    }
}

/// A connection's membership in the broker. Unsubscribes on drop.
pub struct WatchHandle {
    id: ConnectionId,
    broker: WatchBroker,
}

impl WatchHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn watch(&self, dir: &Path, label: &str) -> Result<()> {
        self.broker.subscribe(self.id, dir, label).await
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.broker.unsubscribe(self.id);
    }
}

/// Drop one reference to `dir`. Returns true when it was the last.
fn release(watched: &mut HashMap<PathBuf, usize>, dir: &Path) -> bool {
    let Some(count) = watched.get_mut(dir) else {
        return false;
    };
    *count -= 1;
    if *count > 0 {
        return false;
    }
    watched.remove(dir);
    true
}

/// Wire name of an event kind. `None` for events clients never see.
fn event_kind_name(kind: &EventKind) -> Option<&'static str> {
    match kind {
        EventKind::Create(_) => Some("CREATE"),
        EventKind::Modify(ModifyKind::Name(_)) => Some("RENAME"),
        EventKind::Modify(ModifyKind::Metadata(_)) => Some("CHMOD"),
        EventKind::Modify(_) => Some("WRITE"),
        EventKind::Remove(_) => Some("REMOVE"),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

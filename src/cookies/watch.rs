//! File change notification.
//!
//! Sources never talk to the OS directly: they ask a [`FileWatcher`] for a
//! future that resolves on the next change to their store. A watcher keeps
//! recording changes between calls, so a write that lands while the caller
//! is busy still wakes the next wait.

use crate::base::cookieerror::CookieError;
use dashmap::DashMap;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Alias for the `Future` returned by a [`FileWatcher`].
pub type Changed = Pin<Box<dyn Future<Output = Result<(), CookieError>> + Send>>;

/// Injected "block until this path changes" capability.
pub trait FileWatcher: Send + Sync {
    /// Resolves once `path` is modified, created, replaced or removed.
    ///
    /// Changes since the previous wait on the same path (or since
    /// [`watch`](Self::watch)) resolve it immediately; several such changes
    /// count as one.
    fn changed(&self, path: &Path) -> Changed;

    /// Start recording changes to `path` before the first wait.
    fn watch(&self, _path: &Path) -> Result<(), CookieError> {
        Ok(())
    }

    /// Stop recording changes to `path`.
    fn unwatch(&self, _path: &Path) {}
}

impl<W: FileWatcher + ?Sized> FileWatcher for Arc<W> {
    fn changed(&self, path: &Path) -> Changed {
        (**self).changed(path)
    }

    fn watch(&self, path: &Path) -> Result<(), CookieError> {
        (**self).watch(path)
    }

    fn unwatch(&self, path: &Path) {
        (**self).unwatch(path)
    }
}

/// [`FileWatcher`] backed by the platform notifier (inotify, FSEvents, ...).
///
/// The parent directory is watched, and any event on a file whose name starts
/// with the store's file name counts. This catches SQLite `-wal`/`-journal`
/// companions and rename-replace writes. One registration per store stays
/// alive until [`unwatch`](FileWatcher::unwatch).
#[derive(Default)]
pub struct NotifyWatcher {
    stores: DashMap<PathBuf, StoreWatch>,
}

struct StoreWatch {
    signal: Arc<Notify>,
    _watcher: Mutex<RecommendedWatcher>,
}

impl NotifyWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stores with a live registration.
    pub fn watched_count(&self) -> usize {
        self.stores.len()
    }

    fn signal(&self, path: &Path) -> Result<Arc<Notify>, CookieError> {
        if let Some(store) = self.stores.get(path) {
            return Ok(Arc::clone(&store.signal));
        }
        let store = StoreWatch::register(path)?;
        // A registration that raced ours in keeps its slot.
        let entry = self.stores.entry(path.to_path_buf()).or_insert(store);
        Ok(Arc::clone(&entry.signal))
    }
}

impl std::fmt::Debug for NotifyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyWatcher").field("stores", &self.stores.len()).finish()
    }
}

impl StoreWatch {
    fn register(path: &Path) -> Result<Self, CookieError> {
        let signal = Arc::new(Notify::new());
        let store = path.to_path_buf();
        let wake = Arc::clone(&signal);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_store_event(&store, &event) => wake.notify_one(),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(path = %store.display(), error = %e, "Watcher error");
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| watch_error(path, e))?;

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| watch_error(path, e))?;
        tracing::trace!(path = %path.display(), "Watching cookie store");

        Ok(Self { signal, _watcher: Mutex::new(watcher) })
    }
}

impl FileWatcher for NotifyWatcher {
    fn changed(&self, path: &Path) -> Changed {
        match self.signal(path) {
            Ok(signal) => Box::pin(async move {
                signal.notified().await;
                Ok(())
            }),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }

    fn watch(&self, path: &Path) -> Result<(), CookieError> {
        self.signal(path).map(drop)
    }

    fn unwatch(&self, path: &Path) {
        self.stores.remove(path);
    }
}

fn watch_error(path: &Path, err: notify::Error) -> CookieError {
    let source = match err.kind {
        notify::ErrorKind::Io(io_err) => io_err,
        other => io::Error::other(format!("{other:?}")),
    };
    CookieError::file_permission(path.display().to_string(), source)
}

fn is_store_event(store: &Path, event: &Event) -> bool {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
        return false;
    }
    let Some(store_name) = store.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    event.paths.iter().any(|p| {
        p.file_name()
            .map(|n| n.to_string_lossy().starts_with(store_name.as_ref()))
            .unwrap_or(false)
    })
}

/// [`FileWatcher`] driven by explicit [`trigger`](ManualWatcher::trigger)
/// calls, for hosts with their own change feed and for tests.
///
/// Triggers coalesce: any number of triggers before the next wait yields a
/// single wake-up.
#[derive(Debug, Default)]
pub struct ManualWatcher {
    signals: DashMap<PathBuf, Arc<Notify>>,
}

impl ManualWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn signal(&self, path: &Path) -> Arc<Notify> {
        self.signals.entry(path.to_path_buf()).or_default().clone()
    }

    /// Report a change to `path`.
    pub fn trigger(&self, path: &Path) {
        self.signal(path).notify_one();
    }
}

impl FileWatcher for ManualWatcher {
    fn changed(&self, path: &Path) -> Changed {
        let signal = self.signal(path);
        Box::pin(async move {
            signal.notified().await;
            Ok(())
        })
    }
}

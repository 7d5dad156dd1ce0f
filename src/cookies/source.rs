//! Per-browser cookie sources.
//!
//! A [`BrowserCookieSource`] wraps one store ([`SourceKind`]) and remembers
//! which domains it reported last time, so each [`update`](BrowserCookieSource::update)
//! yields a [`DomainDelta`]: every current domain with its full cookie list,
//! plus the domains that disappeared.
//!
//! Once started, a source runs as two tasks:
//!
//! - the **monitor** re-opens the store (with bounded retry), waits on the
//!   [`FileWatcher`] and posts a wake-up;
//! - the **decoder** owns the source and runs an update per wake-up on the
//!   blocking pool.
//!
//! Wake-ups go through a channel of capacity 1, so changes arriving while a
//! decode is in flight collapse into one follow-up decode.
//!
//! ```text
//! Uninitialized ──load ok──► Ready ──watch──► Monitoring ──open fails──► Stopped
//!       │
//!       └──load fails──► Unavailable
//! ```

use crate::base::context::IoResultExt;
use crate::base::cookieerror::CookieError;
use crate::base::retry::{calculate_backoff, should_retry, RetryConfig};
use crate::cookies::config::{SourceConfig, StoreFormat};
use crate::cookies::cookie::{Browser, CookieDomainGroup};
use crate::cookies::events::SourceEvent;
use crate::cookies::safari::BinaryCookieDecoder;
use crate::cookies::schema::ColumnMap;
use crate::cookies::tabular::{SqliteRowSource, TabularCookieReader};
use crate::cookies::watch::FileWatcher;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Progress is forwarded in steps of at least this fraction.
const PROGRESS_STEP: f64 = 0.01;

/// A readable cookie store.
pub trait CookieStore: Send {
    fn browser(&self) -> Browser;

    fn path(&self) -> &Path;

    /// Open a fresh handle on the store and read every domain group.
    ///
    /// `progress` receives `1 / units` per decoded page or row.
    fn load(
        &mut self,
        progress: &mut dyn FnMut(f64),
    ) -> Result<Vec<CookieDomainGroup>, CookieError>;
}

/// A `Cookies.binarycookies` file.
#[derive(Debug, Clone)]
pub struct BinarySource {
    path: PathBuf,
    decoder: BinaryCookieDecoder,
}

impl BinarySource {
    pub fn new(browser: Browser, path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), decoder: BinaryCookieDecoder::for_browser(browser) }
    }
}

impl CookieStore for BinarySource {
    fn browser(&self) -> Browser {
        self.decoder.browser()
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn load(
        &mut self,
        progress: &mut dyn FnMut(f64),
    ) -> Result<Vec<CookieDomainGroup>, CookieError> {
        let data = std::fs::read(&self.path).permission_context(&self.path)?;
        self.decoder.decode_with_progress(data, progress)
    }
}

/// A SQLite cookie table (`cookies` or `moz_cookies`).
#[derive(Debug, Clone)]
pub struct TableSource {
    browser: Browser,
    path: PathBuf,
    format: StoreFormat,
}

impl TableSource {
    pub fn new(browser: Browser, path: impl Into<PathBuf>, format: StoreFormat) -> Self {
        Self { browser, path: path.into(), format }
    }

    fn open(&self, writable: bool) -> Result<(SqliteRowSource, TabularCookieReader), CookieError> {
        std::fs::metadata(&self.path).permission_context(&self.path)?;
        let mut db = if writable {
            SqliteRowSource::open_read_write(&self.path)
        } else {
            SqliteRowSource::open_read_only(&self.path)
        }
        .map_err(|e| e.for_browser(self.browser))?;

        let columns = match self.format {
            StoreFormat::FirefoxTable => ColumnMap::firefox(),
            _ => TabularCookieReader::detect_chrome(&mut db)
                .map_err(|e| e.for_browser(self.browser))?
                .columns()
                .clone(),
        };
        Ok((db, TabularCookieReader::new(self.browser, columns)))
    }

    /// Delete rows by id in a single transaction on a read-write connection.
    pub fn delete(&self, ids: &[i64]) -> Result<usize, CookieError> {
        let (mut db, reader) = self.open(true).map_err(|e| match e {
            CookieError::Parsing { message, .. } => {
                CookieError::operation_failed(self.browser, message)
            }
            other => other,
        })?;
        reader.delete(&mut db, ids)
    }
}

impl CookieStore for TableSource {
    fn browser(&self) -> Browser {
        self.browser
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn load(
        &mut self,
        progress: &mut dyn FnMut(f64),
    ) -> Result<Vec<CookieDomainGroup>, CookieError> {
        let (mut db, reader) = self.open(false)?;
        reader.read(&mut db, progress)
    }
}

/// The store behind a source.
#[derive(Debug, Clone)]
pub enum SourceKind {
    Binary(BinarySource),
    Chrome(TableSource),
    Firefox(TableSource),
}

impl SourceKind {
    pub fn from_config(config: &SourceConfig) -> Self {
        let browser = config.browser;
        let path = config.path.clone();
        match config.format {
            StoreFormat::BinaryCookies => SourceKind::Binary(BinarySource::new(browser, path)),
            StoreFormat::ChromeTable => {
                SourceKind::Chrome(TableSource::new(browser, path, StoreFormat::ChromeTable))
            }
            StoreFormat::FirefoxTable => {
                SourceKind::Firefox(TableSource::new(browser, path, StoreFormat::FirefoxTable))
            }
        }
    }

    fn store(&self) -> &dyn CookieStore {
        match self {
            SourceKind::Binary(s) => s,
            SourceKind::Chrome(s) | SourceKind::Firefox(s) => s,
        }
    }

    fn store_mut(&mut self) -> &mut dyn CookieStore {
        match self {
            SourceKind::Binary(s) => s,
            SourceKind::Chrome(s) | SourceKind::Firefox(s) => s,
        }
    }
}

impl CookieStore for SourceKind {
    fn browser(&self) -> Browser {
        self.store().browser()
    }

    fn path(&self) -> &Path {
        self.store().path()
    }

    fn load(
        &mut self,
        progress: &mut dyn FnMut(f64),
    ) -> Result<Vec<CookieDomainGroup>, CookieError> {
        self.store_mut().load(progress)
    }
}

/// Delete rows from the store described by `config`.
pub fn delete_from_store(config: &SourceConfig, ids: &[i64]) -> Result<usize, CookieError> {
    match config.format {
        StoreFormat::BinaryCookies => Err(CookieError::operation_failed(
            config.browser,
            "binary cookie stores do not support deletion",
        )),
        format => TableSource::new(config.browser, &config.path, format).delete(ids),
    }
}

/// Lifecycle of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceState {
    Uninitialized,
    /// Initial load done.
    Ready,
    /// A watch is registered on the store.
    Monitoring,
    /// Terminal: the store could not be re-opened.
    Stopped,
    /// Initial load failed, e.g. the browser is not installed.
    Unavailable,
}

impl SourceState {
    pub fn is_available(self) -> bool {
        matches!(self, SourceState::Ready | SourceState::Monitoring)
    }
}

/// Result of one update cycle.
#[derive(Debug, Clone, Default)]
pub struct DomainDelta {
    /// Every domain currently in the store, with its complete cookie list.
    pub updated: Vec<CookieDomainGroup>,
    /// Domains reported last cycle that are gone now, sorted.
    pub lost: Vec<String>,
}

pub struct BrowserCookieSource {
    kind: SourceKind,
    known_domains: HashSet<String>,
    state: Arc<watch::Sender<SourceState>>,
}

impl BrowserCookieSource {
    pub fn new(kind: SourceKind) -> Self {
        let (state, _) = watch::channel(SourceState::Uninitialized);
        Self { kind, known_domains: HashSet::new(), state: Arc::new(state) }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(SourceKind::from_config(config))
    }

    pub fn browser(&self) -> Browser {
        self.kind.browser()
    }

    pub fn path(&self) -> &Path {
        self.kind.path()
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn state(&self) -> SourceState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SourceState> {
        self.state.subscribe()
    }

    /// Re-read the store and diff its domains against the previous cycle.
    ///
    /// Groups the decoder emitted separately for one domain are merged, in
    /// first-appearance order. On error the previous domain set is kept.
    pub fn update(&mut self, progress: &mut dyn FnMut(f64)) -> Result<DomainDelta, CookieError> {
        let groups = merge_by_domain(self.kind.load(progress)?);

        let current: HashSet<String> = groups.iter().map(|g| g.domain().to_string()).collect();
        let mut lost: Vec<String> = self.known_domains.difference(&current).cloned().collect();
        lost.sort();
        self.known_domains = current;

        if self.state() == SourceState::Uninitialized {
            self.state.send_replace(SourceState::Ready);
        }
        Ok(DomainDelta { updated: groups, lost })
    }

    pub fn on_stopped(&mut self) {
        self.state.send_replace(SourceState::Stopped);
    }

    fn mark_unavailable(&mut self) {
        self.state.send_replace(SourceState::Unavailable);
    }
}

impl std::fmt::Debug for BrowserCookieSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserCookieSource")
            .field("kind", &self.kind)
            .field("known_domains", &self.known_domains.len())
            .field("state", &self.state())
            .finish()
    }
}

fn merge_by_domain(groups: Vec<CookieDomainGroup>) -> Vec<CookieDomainGroup> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(groups.len());
    let mut merged: Vec<CookieDomainGroup> = Vec::with_capacity(groups.len());
    for group in groups {
        match positions.get(group.domain()) {
            Some(&idx) => merged[idx].extend(group.into_cookies()),
            None => {
                positions.insert(group.domain().to_string(), merged.len());
                merged.push(group);
            }
        }
    }
    merged
}

/// Handle to a started source.
#[derive(Debug)]
pub struct SourceTask {
    pub browser: Browser,
    pub state: watch::Receiver<SourceState>,
    pub handle: JoinHandle<()>,
}

/// Start a source: initial load, then monitoring until the store can no
/// longer be opened or `shutdown` flips to `true`.
///
/// All output goes to `events`. A source that stops on its own sends exactly
/// one [`SourceEvent::Stopped`]; one ended by `shutdown` sends none.
pub fn spawn_source(
    source: BrowserCookieSource,
    watcher: Arc<dyn FileWatcher>,
    retry: RetryConfig,
    events: mpsc::UnboundedSender<SourceEvent>,
    shutdown: watch::Receiver<bool>,
) -> SourceTask {
    let browser = source.browser();
    let state = source.subscribe_state();
    let handle = tokio::spawn(run_source(source, watcher, retry, events, shutdown));
    SourceTask { browser, state, handle }
}

async fn run_source(
    source: BrowserCookieSource,
    watcher: Arc<dyn FileWatcher>,
    retry: RetryConfig,
    events: mpsc::UnboundedSender<SourceEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let browser = source.browser();
    let path = source.path().to_path_buf();
    let state = Arc::clone(&source.state);

    // Armed before the first read so a write during it still wakes the monitor.
    if let Err(e) = watcher.watch(&path) {
        tracing::debug!(browser = %browser, error = %e, "Store watch not armed yet");
    }

    let Some((mut source, initial)) = decode_cycle(source, &events).await else {
        watcher.unwatch(&path);
        state.send_replace(SourceState::Unavailable);
        return;
    };
    if let Err(e) = initial {
        tracing::debug!(browser = %browser, error = %e, "Cookie store unavailable");
        watcher.unwatch(&path);
        source.mark_unavailable();
        return;
    }

    let (wake_tx, wake_rx) = mpsc::channel(1);
    let decoder = tokio::spawn(run_decoder(source, events, wake_rx, shutdown.clone()));
    monitor(&path, browser, watcher.as_ref(), &retry, &state, wake_tx, &mut shutdown).await;
    watcher.unwatch(&path);
    let _ = decoder.await;
}

/// Open, watch, wake the decoder; repeat. Returns on shutdown or when the
/// store cannot be opened within the retry budget.
async fn monitor(
    path: &Path,
    browser: Browser,
    watcher: &dyn FileWatcher,
    retry: &RetryConfig,
    state: &watch::Sender<SourceState>,
    wake: mpsc::Sender<()>,
    shutdown: &mut watch::Receiver<bool>,
) {
    loop {
        let opened = tokio::select! {
            _ = wait_shutdown(shutdown) => return,
            opened = open_with_retry(path, retry) => opened,
        };
        let handle = match opened {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(
                    browser = %browser,
                    error = %e,
                    retry_budget_ms = retry.budget().as_millis() as u64,
                    "Cookie store can no longer be opened"
                );
                return;
            }
        };
        state.send_replace(SourceState::Monitoring);

        let changed = tokio::select! {
            _ = wait_shutdown(shutdown) => return,
            changed = watcher.changed(path) => changed,
        };
        drop(handle);

        if let Err(e) = changed {
            tracing::debug!(browser = %browser, error = %e, "Watch failed, re-reading after backoff");
            tokio::select! {
                _ = wait_shutdown(shutdown) => return,
                _ = tokio::time::sleep(calculate_backoff(1, retry)) => {}
            }
        }
        // Full means a decode is already queued.
        let _ = wake.try_send(());
    }
}

async fn run_decoder(
    mut source: BrowserCookieSource,
    events: mpsc::UnboundedSender<SourceEvent>,
    mut wake: mpsc::Receiver<()>,
    shutdown: watch::Receiver<bool>,
) {
    let browser = source.browser();
    let state = Arc::clone(&source.state);

    while wake.recv().await.is_some() {
        if is_shutdown(&shutdown) {
            return;
        }
        match decode_cycle(source, &events).await {
            Some((next, _)) => source = next,
            None => {
                state.send_replace(SourceState::Stopped);
                let _ = events.send(SourceEvent::Stopped { browser });
                return;
            }
        }
    }

    if is_shutdown(&shutdown) {
        tracing::debug!(browser = %browser, "Cookie source shut down");
        return;
    }
    source.on_stopped();
    tracing::warn!(browser = %browser, "Stopped tracking cookie store");
    let _ = events.send(SourceEvent::Stopped { browser });
}

/// One `Started` .. `Finished` bracket around an update on the blocking pool.
///
/// Returns `None` only if the update task itself died, in which case the
/// source is gone.
async fn decode_cycle(
    mut source: BrowserCookieSource,
    events: &mpsc::UnboundedSender<SourceEvent>,
) -> Option<(BrowserCookieSource, Result<(), CookieError>)> {
    let browser = source.browser();
    let _ = events.send(SourceEvent::Started { browser });

    let progress_events = events.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let mut progress = ProgressBatcher::new(browser, progress_events);
        let result = source.update(&mut |unit| progress.add(unit));
        progress.flush();
        (source, result)
    })
    .await;

    let (source, result) = match joined {
        Ok(done) => done,
        Err(e) => {
            tracing::error!(browser = %browser, error = %e, "Cookie decode task failed");
            let _ = events.send(SourceEvent::Finished { browser });
            return None;
        }
    };

    let result = match result {
        Ok(delta) => {
            tracing::debug!(
                browser = %browser,
                domains = delta.updated.len(),
                lost = delta.lost.len(),
                "Cookie store read"
            );
            for group in delta.updated {
                let domain = group.domain().to_string();
                let cookies = group.into_cookies();
                let _ = events.send(SourceEvent::DomainUpdated { browser, domain, cookies });
            }
            for domain in delta.lost {
                let _ = events.send(SourceEvent::DomainLost { browser, domain });
            }
            Ok(())
        }
        Err(e) => {
            tracing::warn!(browser = %browser, error = %e, "Cookie store update failed");
            Err(e)
        }
    };
    let _ = events.send(SourceEvent::Finished { browser });
    Some((source, result))
}

/// Open the store file, retrying with backoff while it is missing or locked.
pub async fn open_with_retry(
    path: &Path,
    retry: &RetryConfig,
) -> Result<tokio::fs::File, CookieError> {
    let mut attempt = 0;
    loop {
        match tokio::fs::File::open(path).await.permission_context(path) {
            Ok(file) => return Ok(file),
            Err(e) if should_retry(attempt, retry) => {
                attempt += 1;
                let delay = calculate_backoff(attempt, retry);
                tracing::debug!(
                    path = %path.display(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying cookie store open"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn wait_shutdown(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender also ends the wait.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}

/// Coalesces per-unit progress into steps of [`PROGRESS_STEP`].
struct ProgressBatcher {
    browser: Browser,
    events: mpsc::UnboundedSender<SourceEvent>,
    pending: f64,
}

impl ProgressBatcher {
    fn new(browser: Browser, events: mpsc::UnboundedSender<SourceEvent>) -> Self {
        Self { browser, events, pending: 0.0 }
    }

    fn add(&mut self, fraction: f64) {
        self.pending += fraction;
        if self.pending >= PROGRESS_STEP {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.pending > 0.0 {
            let fraction = std::mem::take(&mut self.pending);
            let _ = self.events.send(SourceEvent::Progress { browser: self.browser, fraction });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::cookie::Cookie;
    use rusqlite::Connection;
    use time::OffsetDateTime;

    fn firefox_store(path: &Path, rows: &[(i64, &str, &str)]) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "DROP TABLE IF EXISTS moz_cookies;
             CREATE TABLE moz_cookies (
                id INTEGER PRIMARY KEY, host TEXT, name TEXT, value TEXT, path TEXT,
                expiry INTEGER, creationTime INTEGER, isSecure INTEGER, isHttpOnly INTEGER
             );",
        )
        .unwrap();
        for (id, host, name) in rows {
            conn.execute(
                "INSERT INTO moz_cookies VALUES (?1, ?2, ?3, 'v', '/', 0, 0, 0, 0)",
                rusqlite::params![id, host, name],
            )
            .unwrap();
        }
    }

    #[test]
    fn test_update_reports_lost_domains() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.sqlite");
        firefox_store(&path, &[(1, "a.com", "x"), (2, "b.com", "y")]);

        let mut source =
            BrowserCookieSource::from_config(&SourceConfig::new(Browser::Firefox, &path));
        assert_eq!(source.state(), SourceState::Uninitialized);

        let delta = source.update(&mut |_| {}).unwrap();
        assert_eq!(delta.updated.len(), 2);
        assert!(delta.lost.is_empty());
        assert_eq!(source.state(), SourceState::Ready);

        firefox_store(&path, &[(2, "b.com", "y")]);
        let delta = source.update(&mut |_| {}).unwrap();
        assert_eq!(delta.updated.len(), 1);
        assert_eq!(delta.updated[0].domain(), "b.com");
        assert_eq!(delta.lost, vec!["a.com".to_string()]);
    }

    #[test]
    fn test_failed_update_keeps_known_domains() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.sqlite");
        firefox_store(&path, &[(1, "a.com", "x")]);

        let mut source =
            BrowserCookieSource::from_config(&SourceConfig::new(Browser::Firefox, &path));
        source.update(&mut |_| {}).unwrap();

        std::fs::remove_file(&path).unwrap();
        let err = source.update(&mut |_| {}).unwrap_err();
        assert!(matches!(err, CookieError::FilePermission { .. }));

        firefox_store(&path, &[]);
        let delta = source.update(&mut |_| {}).unwrap();
        assert_eq!(delta.lost, vec!["a.com".to_string()]);
    }

    #[test]
    fn test_merge_by_domain_first_appearance() {
        let cookie = |domain: &str, name: &str| {
            Cookie::new(Browser::Safari, domain, name, "v", "/", OffsetDateTime::UNIX_EPOCH)
        };
        let groups = vec![
            CookieDomainGroup::with_cookies("b.com", vec![cookie("b.com", "1")]),
            CookieDomainGroup::with_cookies("a.com", vec![cookie("a.com", "2")]),
            CookieDomainGroup::with_cookies("b.com", vec![cookie("b.com", "3")]),
        ];
        let merged = merge_by_domain(groups);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].domain(), "b.com");
        assert_eq!(merged[0].len(), 2);
        assert_eq!(merged[1].domain(), "a.com");
    }

    #[test]
    fn test_delete_from_binary_store_rejected() {
        let config = SourceConfig::new(Browser::Safari, "/nonexistent/Cookies.binarycookies");
        let err = delete_from_store(&config, &[1]).unwrap_err();
        assert!(matches!(err, CookieError::OperationFailed { browser: Browser::Safari, .. }));
    }

    #[tokio::test]
    async fn test_open_with_retry_gives_up() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("Cookies");
        let err = open_with_retry(&missing, &RetryConfig::quick(2)).await.unwrap_err();
        assert!(matches!(err, CookieError::FilePermission { .. }));
    }

    #[tokio::test]
    async fn test_open_with_retry_sees_late_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Cookies");
        let late = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
            std::fs::write(late, b"x").unwrap();
        });
        assert!(open_with_retry(&path, &RetryConfig::quick(20)).await.is_ok());
    }

    #[test]
    fn test_progress_batcher_coalesces() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut batcher = ProgressBatcher::new(Browser::Chrome, tx);
        for _ in 0..1000 {
            batcher.add(0.001);
        }
        batcher.flush();

        let mut total = 0.0;
        let mut sends = 0;
        while let Ok(SourceEvent::Progress { fraction, .. }) = rx.try_recv() {
            total += fraction;
            sends += 1;
        }
        assert!((total - 1.0).abs() < 1e-9);
        assert!(sends <= 101);
    }
}

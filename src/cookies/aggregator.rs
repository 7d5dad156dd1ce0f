//! The cookie aggregator: one merged, searchable view over every browser.
//!
//! Sources report [`SourceEvent`]s into a single merge task. Only that task
//! (and [`CookieAggregator::delete`], under the same merge lock) writes the
//! [`DomainIndex`]; readers take the index read lock and never observe a
//! partially applied merge.
//!
//! # Example
//!
//! ```rust,no_run
//! use cookiescope::cookies::aggregator::CookieAggregator;
//! use cookiescope::cookies::config::AggregatorConfig;
//! use cookiescope::cookies::events::NoopListener;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), cookiescope::base::CookieError> {
//! let aggregator = CookieAggregator::start(AggregatorConfig::discover(), Arc::new(NoopListener))?;
//! for group in aggregator.search("session") {
//!     println!("{}: {} cookies", group.domain(), group.len());
//! }
//! aggregator.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::base::cookieerror::CookieError;
use crate::cookies::config::{AggregatorConfig, SourceConfig, DEFAULT_INDEX_CHANGE_BATCH};
use crate::cookies::cookie::{Browser, Cookie, CookieDomainGroup};
use crate::cookies::events::{CookieListener, SourceEvent};
use crate::cookies::index::{DomainIndex, MergeOutcome};
use crate::cookies::source::{delete_from_store, spawn_source, BrowserCookieSource, SourceState};
use crate::cookies::watch::{FileWatcher, NotifyWatcher};
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Tracks concurrent parses and turns per-source fractions into one overall
/// progress value.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    active: usize,
    fractions: HashMap<Browser, f64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_parse_count(&self) -> usize {
        self.active
    }

    /// Returns `true` when this start opens a new parse wave.
    pub fn start(&mut self, browser: Browser) -> bool {
        self.active += 1;
        self.fractions.insert(browser, 0.0);
        self.active == 1
    }

    /// Overall progress after `browser` advanced by `fraction`, or `None`
    /// when nothing is parsing.
    pub fn advance(&mut self, browser: Browser, fraction: f64) -> Option<f64> {
        if self.active == 0 {
            return None;
        }
        *self.fractions.entry(browser).or_insert(0.0) += fraction;
        let total: f64 = self.fractions.values().sum();
        Some((total / self.active as f64).clamp(0.0, 1.0))
    }

    /// Returns `true` when the last active parse finished. Floored at zero.
    pub fn finish(&mut self, browser: Browser) -> bool {
        if self.active == 0 {
            return false;
        }
        self.active -= 1;
        self.fractions.remove(&browser);
        self.active == 0
    }
}

/// Outcome of [`CookieAggregator::delete`].
#[derive(Debug, Default)]
pub struct DeleteReport {
    /// Cookies removed from their store and from the index.
    pub deleted: usize,
    /// Cookies ignored because they carry no row id.
    pub skipped: usize,
    /// Browsers whose batch failed; their cookies are untouched.
    pub failures: Vec<(Browser, CookieError)>,
}

impl DeleteReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

struct MergeState {
    progress: ProgressTracker,
    merges_since_notify: usize,
}

struct Inner {
    index: RwLock<DomainIndex>,
    merge: Mutex<MergeState>,
    listener: Arc<dyn CookieListener>,
    index_change_batch: usize,
    /// Mirror of the tracker's count, readable from listener callbacks.
    parsing: AtomicUsize,
    sources: DashMap<Browser, watch::Receiver<SourceState>>,
    delete_targets: DashMap<Browser, SourceConfig>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Merged view over every configured browser's cookies.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CookieAggregator {
    inner: Arc<Inner>,
}

impl CookieAggregator {
    /// An aggregator with no sources. Feed it with [`apply`](Self::apply).
    pub fn new(listener: Arc<dyn CookieListener>) -> Self {
        Self::with_batch(listener, DEFAULT_INDEX_CHANGE_BATCH)
    }

    fn with_batch(listener: Arc<dyn CookieListener>, index_change_batch: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                index: RwLock::new(DomainIndex::new()),
                merge: Mutex::new(MergeState { progress: ProgressTracker::new(), merges_since_notify: 0 }),
                listener,
                index_change_batch: index_change_batch.max(1),
                parsing: AtomicUsize::new(0),
                sources: DashMap::new(),
                delete_targets: DashMap::new(),
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start every configured source, watching stores with the platform
    /// notifier. Must be called from within a Tokio runtime.
    pub fn start(
        config: AggregatorConfig,
        listener: Arc<dyn CookieListener>,
    ) -> Result<Self, CookieError> {
        Self::start_with_watcher(config, listener, Arc::new(NotifyWatcher::new()))
    }

    /// Like [`start`](Self::start) with an injected [`FileWatcher`].
    ///
    /// Sources start concurrently; a slow or missing store does not hold up
    /// the others.
    pub fn start_with_watcher(
        config: AggregatorConfig,
        listener: Arc<dyn CookieListener>,
        watcher: Arc<dyn FileWatcher>,
    ) -> Result<Self, CookieError> {
        config.validate()?;
        let aggregator = Self::with_batch(listener, config.index_change_batch);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut tasks = Vec::with_capacity(config.sources.len() + 1);
        for source_config in &config.sources {
            aggregator.register_store(source_config.clone());
            let task = spawn_source(
                BrowserCookieSource::from_config(source_config),
                Arc::clone(&watcher),
                config.retry.clone(),
                events_tx.clone(),
                aggregator.inner.shutdown.subscribe(),
            );
            aggregator.inner.sources.insert(task.browser, task.state);
            tasks.push(task.handle);
        }
        drop(events_tx);

        tasks.push(tokio::spawn(run_merge(Arc::downgrade(&aggregator.inner), events_rx)));
        lock(&aggregator.inner.tasks).extend(tasks);

        tracing::debug!(sources = config.sources.len(), "Cookie aggregator started");
        Ok(aggregator)
    }

    /// Stop monitoring and wait for every task to wind down. Sources finish
    /// an in-flight decode first; none of them reports `stopped`.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *lock(&self.inner.tasks));
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Apply one source event. This is the only merge path.
    ///
    /// Listener callbacks run on the calling thread after the index lock is
    /// released, so they may read the aggregator. Calling `apply` or
    /// `delete` from inside a callback deadlocks.
    pub fn apply(&self, event: SourceEvent) {
        let listener = &self.inner.listener;
        let mut merge = lock(&self.inner.merge);

        match event {
            SourceEvent::Started { browser } => {
                let first = merge.progress.start(browser);
                self.inner.parsing.store(merge.progress.active_parse_count(), Ordering::Release);
                if first {
                    listener.on_parsing_started();
                }
            }
            SourceEvent::Progress { browser, fraction } => {
                if let Some(overall) = merge.progress.advance(browser, fraction) {
                    listener.on_progress(overall);
                }
            }
            SourceEvent::DomainUpdated { browser, domain, cookies } => {
                let outcome = self.write_index().replace_browser(browser, &domain, cookies);
                match outcome {
                    MergeOutcome::Unchanged => {}
                    MergeOutcome::Updated(group) => {
                        listener.on_domain_updated(&group);
                        self.count_merge(&mut merge);
                    }
                    MergeOutcome::Removed => {
                        listener.on_domain_lost(&domain, browser);
                        self.count_merge(&mut merge);
                    }
                }
            }
            SourceEvent::DomainLost { browser, domain } => {
                let outcome = self.write_index().remove_browser(browser, &domain);
                if outcome.is_some() {
                    listener.on_domain_lost(&domain, browser);
                    self.count_merge(&mut merge);
                }
            }
            SourceEvent::Finished { browser } => {
                let last = merge.progress.finish(browser);
                self.inner.parsing.store(merge.progress.active_parse_count(), Ordering::Release);
                if last {
                    if merge.merges_since_notify > 0 {
                        merge.merges_since_notify = 0;
                        listener.on_index_changed();
                    }
                    listener.on_parsing_finished();
                }
            }
            SourceEvent::Stopped { browser } => {
                listener.on_source_stopped(browser);
            }
        }
    }

    fn count_merge(&self, merge: &mut MergeState) {
        merge.merges_since_notify += 1;
        if merge.merges_since_notify >= self.inner.index_change_batch {
            merge.merges_since_notify = 0;
            self.inner.listener.on_index_changed();
        }
    }

    /// Delete cookies from their browsers' stores, then from the index.
    ///
    /// Cookies are batched per browser and each batch runs in its own
    /// transaction; one failing browser does not affect the others. Cookies
    /// without a row id are skipped.
    pub async fn delete(&self, cookies: &[Cookie]) -> DeleteReport {
        let mut report = DeleteReport::default();
        let mut batches: BTreeMap<Browser, Vec<Cookie>> = BTreeMap::new();
        for cookie in cookies {
            if cookie.row_id.is_none() {
                report.skipped += 1;
                continue;
            }
            batches.entry(cookie.browser).or_default().push(cookie.clone());
        }

        let jobs = batches.into_iter().map(|(browser, batch)| {
            let target = self.inner.delete_targets.get(&browser).map(|t| t.value().clone());
            async move {
                let Some(target) = target else {
                    return (browser, batch, Err(CookieError::SourceUnavailable { browser }));
                };
                let ids: Vec<i64> = batch.iter().filter_map(|c| c.row_id).collect();
                let result = tokio::task::spawn_blocking(move || delete_from_store(&target, &ids))
                    .await
                    .unwrap_or_else(|e| Err(CookieError::operation_failed(browser, e.to_string())));
                (browser, batch, result)
            }
        });
        let results = futures::future::join_all(jobs).await;

        let _merge = lock(&self.inner.merge);
        let mut index = self.write_index();
        for (browser, batch, result) in results {
            match result {
                Ok(rows) => {
                    tracing::debug!(browser = %browser, rows, "Deleted cookies");
                    report.deleted += batch.iter().filter(|c| index.remove_cookie(c)).count();
                }
                Err(e) => {
                    tracing::warn!(browser = %browser, error = %e, "Cookie delete failed");
                    report.failures.push((browser, e));
                }
            }
        }
        drop(index);
        if report.deleted > 0 {
            self.inner.listener.on_index_changed();
        }
        report
    }

    /// Register the store used to delete `config.browser`'s cookies without
    /// monitoring it.
    pub fn register_store(&self, config: SourceConfig) {
        self.inner.delete_targets.insert(config.browser, config);
    }

    /// Browsers whose source is loaded and not stopped.
    pub fn available_browsers(&self) -> BTreeSet<Browser> {
        self.inner
            .sources
            .iter()
            .filter(|entry| entry.value().borrow().is_available())
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn source_state(&self, browser: Browser) -> Option<SourceState> {
        self.inner.sources.get(&browser).map(|entry| *entry.value().borrow())
    }

    /// Group at `index` in domain order.
    pub fn domain_at(&self, index: usize) -> Option<CookieDomainGroup> {
        {
            let snapshot = self.read_index();
            if let Some(group) = snapshot.fresh_domain_at(index) {
                return Some(group.clone());
            }
            if !snapshot.is_stale() {
                return None;
            }
        }
        self.write_index().domain_at(index).cloned()
    }

    pub fn search(&self, query: &str) -> Vec<CookieDomainGroup> {
        self.read_index().search(query)
    }

    pub fn domain_count(&self) -> usize {
        self.read_index().len()
    }

    pub fn cookie_count(&self) -> usize {
        self.read_index().cookie_count()
    }

    /// Sorted domain names.
    pub fn domains(&self) -> Vec<String> {
        {
            let snapshot = self.read_index();
            if !snapshot.is_stale() {
                return snapshot.sorted_groups().iter().map(|g| g.domain().to_string()).collect();
            }
        }
        self.write_index().domains().to_vec()
    }

    pub fn group(&self, domain: &str) -> Option<CookieDomainGroup> {
        self.read_index().get(domain).cloned()
    }

    /// Every group, sorted by domain.
    pub fn groups(&self) -> Vec<CookieDomainGroup> {
        self.read_index().sorted_groups().into_iter().cloned().collect()
    }

    pub fn active_parse_count(&self) -> usize {
        self.inner.parsing.load(Ordering::Acquire)
    }

    fn read_index(&self) -> RwLockReadGuard<'_, DomainIndex> {
        self.inner.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, DomainIndex> {
        self.inner.index.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CookieAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieAggregator")
            .field("domains", &self.domain_count())
            .field("cookies", &self.cookie_count())
            .field("available", &self.available_browsers())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_merge(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<SourceEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        CookieAggregator { inner }.apply(event);
    }
}

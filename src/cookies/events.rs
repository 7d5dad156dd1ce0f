//! Consumer-facing callbacks and the internal source-to-aggregator events.

use crate::cookies::cookie::{Browser, Cookie, CookieDomainGroup};

/// Receives aggregator notifications. Every method defaults to a no-op.
///
/// Calls are serialized by the aggregator's merge lock and are made while
/// holding it: from the merge task for source events, and from the task
/// awaiting [`CookieAggregator::delete`] for the `on_index_changed` that
/// follows a delete. The index lock is never held during a call, so
/// read-only queries (`search`, `group`, `domain_at`, counts) are fine
/// inside a callback.
///
/// Calling [`CookieAggregator::apply`] or [`CookieAggregator::delete`] from
/// a callback deadlocks on the merge lock. Hand such work to another task.
///
/// [`CookieAggregator::apply`]: crate::cookies::aggregator::CookieAggregator::apply
/// [`CookieAggregator::delete`]: crate::cookies::aggregator::CookieAggregator::delete
pub trait CookieListener: Send + Sync {
    /// The first source of a parse wave started.
    fn on_parsing_started(&self) {}

    /// Every active parse has finished.
    fn on_parsing_finished(&self) {}

    /// Overall progress of the current parse wave, in `0.0..=1.0`.
    fn on_progress(&self, _fraction: f64) {}

    /// A group was created or changed. `group` is the merged, all-browser view.
    fn on_domain_updated(&self, _group: &CookieDomainGroup) {}

    /// `browser` no longer holds cookies for `domain`.
    fn on_domain_lost(&self, _domain: &str, _browser: Browser) {}

    fn on_source_stopped(&self, _browser: Browser) {}

    /// The index changed; fired every N merges and when parsing finishes.
    fn on_index_changed(&self) {}
}

/// Listener that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl CookieListener for NoopListener {}

/// What a source reports to the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Started { browser: Browser },
    /// One decode unit (page or row) done; `fraction` is `1 / units`.
    Progress { browser: Browser, fraction: f64 },
    /// Full replacement of `browser`'s cookies for `domain`.
    DomainUpdated { browser: Browser, domain: String, cookies: Vec<Cookie> },
    DomainLost { browser: Browser, domain: String },
    Finished { browser: Browser },
    Stopped { browser: Browser },
}

impl SourceEvent {
    pub fn browser(&self) -> Browser {
        match self {
            SourceEvent::Started { browser }
            | SourceEvent::Progress { browser, .. }
            | SourceEvent::DomainUpdated { browser, .. }
            | SourceEvent::DomainLost { browser, .. }
            | SourceEvent::Finished { browser }
            | SourceEvent::Stopped { browser } => *browser,
        }
    }
}

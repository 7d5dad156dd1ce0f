//! Aggregator configuration: which stores to read and how to re-open them.

use crate::base::cookieerror::CookieError;
use crate::base::retry::RetryConfig;
use crate::cookies::browser::StoreLocator;
use crate::cookies::cookie::Browser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of merged groups between two `on_index_changed` calls.
pub const DEFAULT_INDEX_CHANGE_BATCH: usize = 50;

/// On-disk layout of a cookie store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFormat {
    /// Paged `Cookies.binarycookies` file.
    BinaryCookies,
    /// SQLite `cookies` table.
    ChromeTable,
    /// SQLite `moz_cookies` table.
    FirefoxTable,
}

impl StoreFormat {
    pub fn for_browser(browser: Browser) -> Self {
        match browser {
            Browser::Safari => StoreFormat::BinaryCookies,
            Browser::Chrome => StoreFormat::ChromeTable,
            Browser::Firefox => StoreFormat::FirefoxTable,
        }
    }
}

/// One browser store to aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub browser: Browser,
    pub path: PathBuf,
    pub format: StoreFormat,
}

impl SourceConfig {
    /// A source using the browser's native store format.
    pub fn new(browser: Browser, path: impl Into<PathBuf>) -> Self {
        Self { browser, path: path.into(), format: StoreFormat::for_browser(browser) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub sources: Vec<SourceConfig>,
    /// Re-open policy applied when a watched store changes.
    pub retry: RetryConfig,
    pub index_change_batch: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            retry: RetryConfig::file_open(),
            index_change_batch: DEFAULT_INDEX_CHANGE_BATCH,
        }
    }
}

impl AggregatorConfig {
    /// Every browser store found at its default location on this machine.
    pub fn discover() -> Self {
        let sources = Browser::ALL
            .iter()
            .filter_map(|&browser| {
                let path = StoreLocator::new(browser).existing_store_path()?;
                tracing::debug!(browser = %browser, path = %path.display(), "Found cookie store");
                Some(SourceConfig::new(browser, path))
            })
            .collect();
        Self { sources, ..Self::default() }
    }

    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_index_change_batch(mut self, batch: usize) -> Self {
        self.index_change_batch = batch;
        self
    }

    /// Reject configurations the aggregator cannot run.
    pub fn validate(&self) -> Result<(), CookieError> {
        if self.index_change_batch == 0 {
            return Err(CookieError::Config("index_change_batch must be at least 1".into()));
        }
        for (i, source) in self.sources.iter().enumerate() {
            if self.sources[..i].iter().any(|s| s.browser == source.browser) {
                return Err(CookieError::Config(format!(
                    "{} is configured more than once",
                    source.browser
                )));
            }
        }
        Ok(())
    }

    #[cfg(feature = "json")]
    pub fn from_json_file(path: &std::path::Path) -> Result<Self, CookieError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| CookieError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| CookieError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AggregatorConfig::default();
        assert!(config.sources.is_empty());
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.index_change_batch, DEFAULT_INDEX_CHANGE_BATCH);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_browser_rejected() {
        let config = AggregatorConfig::default()
            .with_source(SourceConfig::new(Browser::Chrome, "/a/Cookies"))
            .with_source(SourceConfig::new(Browser::Chrome, "/b/Cookies"));
        assert!(matches!(config.validate(), Err(CookieError::Config(_))));
    }

    #[test]
    fn test_zero_batch_rejected() {
        let config = AggregatorConfig::default().with_index_change_batch(0);
        assert!(config.validate().is_err());
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "sources": [
                    { "browser": "Firefox", "path": "/tmp/cookies.sqlite", "format": "firefox_table" }
                ],
                "index_change_batch": 10
            }"#,
        )
        .unwrap();

        let config = AggregatorConfig::from_json_file(&path).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].format, StoreFormat::FirefoxTable);
        assert_eq!(config.index_change_batch, 10);
        assert_eq!(config.retry, RetryConfig::file_open());
    }
}

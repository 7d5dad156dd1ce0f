//! Column layouts of the SQLite cookie tables this crate reads.
//!
//! ## Layouts
//! - `cookies` (Chromium): `host_key`, `name`, `value`, `path`, `expires_utc`,
//!   `creation_utc` plus either `secure`/`httponly` (older schema, Unix seconds)
//!   or `is_secure`/`is_httponly` (current schema, microseconds since 1601).
//!   Rows are identified by `creation_utc`.
//! - `moz_cookies` (Firefox): `host`, `name`, `value`, `path`, `expiry`
//!   and `creationTime` (both Unix seconds), `isSecure`,
//!   `isHttpOnly`. Rows are identified by the integer primary key `id`.
//!
//! ## Reference Files
//! - `net/extras/sqlite/sqlite_persistent_cookie_store.cc`
//! - `netwerk/cookie/CookiePersistentStorage.cpp`

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Chromium uses microseconds since 1601-01-01 00:00:00 UTC (Windows FILETIME epoch).
/// This is the offset from Unix epoch (1970-01-01) in microseconds.
pub const CHROME_EPOCH_OFFSET_MICROS: i64 = 11_644_473_600_000_000;

pub const CHROME_TABLE: &str = "cookies";
pub const FIREFOX_TABLE: &str = "moz_cookies";

/// How a timestamp column is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeEncoding {
    UnixSeconds,
    UnixMicros,
    /// Microseconds since 1601-01-01 (Chromium/WebKit).
    WebKitMicros,
}

impl TimeEncoding {
    /// Decode a raw column value. Zero means "no time" (e.g. session cookies).
    ///
    /// Integer arithmetic throughout so microsecond stamps keep full precision.
    pub fn decode(self, raw: i64) -> Option<OffsetDateTime> {
        if raw == 0 {
            return None;
        }
        let raw = i128::from(raw);
        let nanos = match self {
            TimeEncoding::UnixSeconds => raw * 1_000_000_000,
            TimeEncoding::UnixMicros => raw * 1_000,
            TimeEncoding::WebKitMicros => (raw - i128::from(CHROME_EPOCH_OFFSET_MICROS)) * 1_000,
        };
        OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
    }
}

/// Which columns of a table hold which cookie attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMap {
    pub table: String,
    pub domain: String,
    pub name: String,
    pub value: String,
    pub path: String,
    pub expiry: String,
    pub creation: String,
    pub secure: String,
    pub http_only: String,
    /// Column used to target deletes. `None` makes the store read-only.
    pub row_id: Option<String>,
    pub expiry_encoding: TimeEncoding,
    pub creation_encoding: TimeEncoding,
}

impl ColumnMap {
    /// The older Chromium layout with `secure`/`httponly` and Unix seconds.
    pub fn chrome() -> Self {
        Self {
            table: CHROME_TABLE.into(),
            domain: "host_key".into(),
            name: "name".into(),
            value: "value".into(),
            path: "path".into(),
            expiry: "expires_utc".into(),
            creation: "creation_utc".into(),
            secure: "secure".into(),
            http_only: "httponly".into(),
            row_id: Some("creation_utc".into()),
            expiry_encoding: TimeEncoding::UnixSeconds,
            creation_encoding: TimeEncoding::UnixSeconds,
        }
    }

    /// The current Chromium layout with `is_secure`/`is_httponly` and WebKit time.
    pub fn chrome_modern() -> Self {
        Self {
            secure: "is_secure".into(),
            http_only: "is_httponly".into(),
            expiry_encoding: TimeEncoding::WebKitMicros,
            creation_encoding: TimeEncoding::WebKitMicros,
            ..Self::chrome()
        }
    }

    pub fn firefox() -> Self {
        Self {
            table: FIREFOX_TABLE.into(),
            domain: "host".into(),
            name: "name".into(),
            value: "value".into(),
            path: "path".into(),
            expiry: "expiry".into(),
            creation: "creationTime".into(),
            secure: "isSecure".into(),
            http_only: "isHttpOnly".into(),
            row_id: Some("id".into()),
            expiry_encoding: TimeEncoding::UnixSeconds,
            creation_encoding: TimeEncoding::UnixSeconds,
        }
    }

    /// Columns in select order; the row id, when present, comes last.
    pub fn select_columns(&self) -> Vec<&str> {
        let mut columns = vec![
            self.domain.as_str(),
            self.name.as_str(),
            self.value.as_str(),
            self.path.as_str(),
            self.expiry.as_str(),
            self.creation.as_str(),
            self.secure.as_str(),
            self.http_only.as_str(),
        ];
        if let Some(row_id) = &self.row_id {
            columns.push(row_id.as_str());
        }
        columns
    }
}

/// Quote an SQL identifier.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webkit_epoch_conversion() {
        // 2024-01-01 00:00:00 UTC
        let chrome_time = 1704067200_i64 * 1_000_000 + CHROME_EPOCH_OFFSET_MICROS;
        let dt = TimeEncoding::WebKitMicros.decode(chrome_time).unwrap();
        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.unix_timestamp(), 1704067200);
    }

    #[test]
    fn test_zero_is_none() {
        assert!(TimeEncoding::UnixSeconds.decode(0).is_none());
        assert!(TimeEncoding::UnixMicros.decode(0).is_none());
        assert!(TimeEncoding::WebKitMicros.decode(0).is_none());
    }

    #[test]
    fn test_known_values() {
        let t = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(TimeEncoding::UnixSeconds.decode(1_700_000_000), Some(t));
        assert_eq!(TimeEncoding::UnixMicros.decode(1_700_000_000_000_000), Some(t));
        assert_eq!(
            TimeEncoding::WebKitMicros.decode(1_700_000_000_000_000 + CHROME_EPOCH_OFFSET_MICROS),
            Some(t)
        );
    }

    #[test]
    fn test_webkit_keeps_microseconds() {
        // Above 2^53, where a float would round the last digit.
        let raw = 13_344_473_600_123_457_i64;
        let dt = TimeEncoding::WebKitMicros.decode(raw).unwrap();
        assert_eq!(dt.unix_timestamp(), 1_700_000_000);
        assert_eq!(dt.microsecond(), 123_457);
        assert_eq!(dt.unix_timestamp_nanos(), 1_700_000_000_123_457_000);
    }

    #[test]
    fn test_out_of_range_is_none() {
        assert!(TimeEncoding::UnixSeconds.decode(i64::MAX).is_none());
        assert!(TimeEncoding::WebKitMicros.decode(i64::MIN).is_none());
    }

    #[test]
    fn test_column_presets() {
        let chrome = ColumnMap::chrome();
        assert_eq!(chrome.table, "cookies");
        assert_eq!(chrome.row_id.as_deref(), Some("creation_utc"));
        assert_eq!(chrome.select_columns().len(), 9);

        let modern = ColumnMap::chrome_modern();
        assert_eq!(modern.secure, "is_secure");
        assert_eq!(modern.domain, "host_key");

        let firefox = ColumnMap::firefox();
        assert_eq!(firefox.table, "moz_cookies");
        assert_eq!(firefox.row_id.as_deref(), Some("id"));
        assert_eq!(firefox.select_columns().last(), Some(&"id"));
        assert_eq!(firefox.creation_encoding, TimeEncoding::UnixSeconds);
        assert_eq!(firefox.expiry_encoding, TimeEncoding::UnixSeconds);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("host_key"), "\"host_key\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}

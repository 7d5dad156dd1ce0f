use crate::cookies::cookie::Browser;
use std::io;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum CookieError {
    /// The store's backing file could not be opened, even after retrying.
    #[error("Cannot access cookie store {path}: {source}")]
    FilePermission {
        path: String,
        #[source]
        source: Arc<io::Error>,
    },

    /// A file-level structural invariant of a binary cookie store was violated.
    #[error("Malformed cookie file: {0}")]
    Format(String),

    /// The row source failed to answer a count/select query.
    #[error("Failed to read {browser} cookies: {message}")]
    Parsing { browser: Browser, message: String },

    /// A delete statement against a browser's store failed.
    #[error("Failed to delete {browser} cookies: {message}")]
    OperationFailed { browser: Browser, message: String },

    /// A read ran past the end of a buffer.
    #[error("Read of {needed} bytes at offset {offset} exceeds buffer of {len} bytes")]
    OutOfBounds { offset: usize, needed: usize, len: usize },

    #[error("{browser} cookie store is not available")]
    SourceUnavailable { browser: Browser },

    /// Raw SQLite failure, not yet attributed to a browser.
    #[error("Cookie database error: {0}")]
    Database(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cookie export failed: {0}")]
    Export(String),
}

impl CookieError {
    pub fn format(reason: impl Into<String>) -> Self {
        CookieError::Format(reason.into())
    }

    pub fn parsing(browser: Browser, message: impl Into<String>) -> Self {
        CookieError::Parsing { browser, message: message.into() }
    }

    pub fn operation_failed(browser: Browser, message: impl Into<String>) -> Self {
        CookieError::OperationFailed { browser, message: message.into() }
    }

    pub fn file_permission(path: impl Into<String>, source: io::Error) -> Self {
        CookieError::FilePermission { path: path.into(), source: Arc::new(source) }
    }

    /// Attribute a database error raised by a browser-agnostic reader.
    pub fn for_browser(self, browser: Browser) -> Self {
        match self {
            CookieError::Database(message) => CookieError::Parsing { browser, message },
            CookieError::Parsing { message, .. } => CookieError::Parsing { browser, message },
            CookieError::OperationFailed { message, .. } => {
                CookieError::OperationFailed { browser, message }
            }
            other => other,
        }
    }
}

// The browser is unknown at this layer; callers attribute with `for_browser`.
impl From<rusqlite::Error> for CookieError {
    fn from(err: rusqlite::Error) -> Self {
        let message = match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ffi::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ffi::ErrorCode::DatabaseLocked =>
            {
                format!("database locked: {err}")
            }
            _ => err.to_string(),
        };
        CookieError::Database(message)
    }
}

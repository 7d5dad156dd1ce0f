//! Ergonomic error context helpers.
//!
//! Provides extension traits for adding context to `Result` types,
//! converting IO errors into context-rich `CookieError` variants.

use crate::base::cookieerror::CookieError;
use std::io;
use std::path::Path;

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Attach the store path to an IO error.
    ///
    /// # Example
    /// ```ignore
    /// use cookiescope::base::context::IoResultExt;
    ///
    /// let bytes = std::fs::read(&path).permission_context(&path)?;
    /// // Error: "Cannot access cookie store /…/Cookies.binarycookies: permission denied"
    /// ```
    fn permission_context(self, path: &Path) -> Result<T, CookieError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn permission_context(self, path: &Path) -> Result<T, CookieError> {
        self.map_err(|e| CookieError::file_permission(path.display().to_string(), e))
    }
}

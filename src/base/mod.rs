//! Base types and error handling.
//!
//! - [`CookieError`](cookieerror::CookieError): error taxonomy shared by every cookie source
//! - [`RetryConfig`](retry::RetryConfig): bounded retry used when re-opening stores
//! - [`IoResultExt`](context::IoResultExt): attaches store paths to IO errors

pub mod context;
pub mod cookieerror;
pub mod retry;

pub use cookieerror::CookieError;

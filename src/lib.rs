//! # cookiescope
//!
//! Aggregates the cookie stores of several browsers into one live,
//! searchable in-memory index.
//!
//! ## Features
//!
//! - **Safari**: decoder for the paged `Cookies.binarycookies` format
//! - **Chrome/Firefox**: readers for the `cookies` and `moz_cookies` SQLite tables
//! - **Live updates**: each store is watched and re-read on change; the
//!   index receives per-domain replacements and removals
//! - **Search & delete**: substring search across domains, names and values;
//!   deletes go back to the SQLite stores, one transaction per browser
//! - **Export**: Netscape `cookies.txt` and JSON snapshots
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cookiescope::cookies::{AggregatorConfig, CookieAggregator, NoopListener};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let aggregator =
//!         CookieAggregator::start(AggregatorConfig::discover(), Arc::new(NoopListener)).unwrap();
//!     for group in aggregator.search("secure") {
//!         println!("{} ({} cookies)", group.domain(), group.len());
//!     }
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error type, error context and retry policy
//! - [`cookies`] - Decoders, sources and the aggregator

pub mod base;
pub mod cookies;

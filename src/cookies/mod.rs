//! Browser cookie stores and their aggregation.
//!
//! # Architecture
//!
//! | Layer | Module | Responsibility |
//! |-------|--------|----------------|
//! | Bytes | [`bytecursor`] | Bounds-checked reads over the raw store file |
//! | Decode | [`safari`], [`tabular`], [`schema`] | Store contents to [`CookieDomainGroup`]s |
//! | Source | [`source`], [`watch`] | Per-browser change tracking and file monitoring |
//! | Merge | [`aggregator`], [`index`] | One index over every browser, search, delete |
//! | Output | [`events`], [`export`] | Listener callbacks, cookies.txt / JSON |
//!
//! Data flows one way: file bytes → decoded groups → per-browser domain
//! deltas → merged index → queries.
//!
//! # Decoding a Safari store
//!
//! ```rust,no_run
//! use cookiescope::cookies::safari::decode_binary_cookies;
//!
//! let data = std::fs::read("Cookies.binarycookies")?;
//! for group in decode_binary_cookies(data)? {
//!     println!("{}: {} cookies", group.domain(), group.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Supported Stores
//!
//! | Browser | Format | Delete |
//! |---------|--------|--------|
//! | Safari | binarycookies | no (no row identity) |
//! | Chrome/Chromium | SQLite `cookies` | yes, by `creation_utc` |
//! | Firefox | SQLite `moz_cookies` | yes, by `id` |

pub mod aggregator;
pub mod browser;
pub mod bytecursor;
pub mod config;
pub mod cookie;
pub mod events;
pub mod export;
pub mod index;
pub mod safari;
pub mod schema;
pub mod source;
pub mod tabular;
pub mod watch;

pub use aggregator::{CookieAggregator, DeleteReport};
pub use config::{AggregatorConfig, SourceConfig, StoreFormat};
pub use cookie::{Browser, Cookie, CookieDomainGroup};
pub use events::{CookieListener, NoopListener, SourceEvent};
pub use source::SourceState;

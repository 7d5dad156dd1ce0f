//! Export of the aggregated index.
//!
//! - Netscape `cookies.txt` (curl/wget compatible)
//! - JSON snapshot (with the `json` feature)

use crate::cookies::aggregator::CookieAggregator;
use crate::cookies::cookie::CookieDomainGroup;

/// Render groups in Netscape cookie file format.
///
/// `domain_filter` keeps cookies whose domain contains the filter or is
/// contained in it, so `"example.com"` matches `.example.com` and
/// `www.example.com`.
pub fn to_netscape(groups: &[CookieDomainGroup], domain_filter: Option<&str>) -> String {
    let mut lines = vec![
        "# Netscape HTTP Cookie File".to_string(),
        "# https://curl.se/docs/http-cookies.html".to_string(),
        "# This file was generated by cookiescope".to_string(),
        String::new(),
    ];

    for cookie in groups.iter().flat_map(|g| g.cookies()) {
        if let Some(filter) = domain_filter {
            if !cookie.domain.contains(filter) && !filter.contains(cookie.domain.as_str()) {
                continue;
            }
        }

        // Format: domain \t include_subdomains \t path \t secure \t expiry \t name \t value
        let include_subdomains = if cookie.domain.starts_with('.') { "TRUE" } else { "FALSE" };
        let secure = if cookie.secure { "TRUE" } else { "FALSE" };
        let expiry = cookie.expiry.map(|t| t.unix_timestamp()).unwrap_or(0);
        // curl marks HttpOnly cookies with a domain prefix.
        let domain = if cookie.http_only {
            format!("#HttpOnly_{}", cookie.domain)
        } else {
            cookie.domain.clone()
        };

        lines.push(format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            domain, include_subdomains, cookie.path, secure, expiry, cookie.name, cookie.value
        ));
    }

    lines.join("\n")
}

#[cfg(feature = "json")]
mod json {
    use crate::base::cookieerror::CookieError;
    use crate::cookies::cookie::CookieDomainGroup;
    use std::path::Path;

    /// Serialize groups as pretty-printed JSON.
    pub fn to_json(groups: &[CookieDomainGroup]) -> Result<String, CookieError> {
        serde_json::to_string_pretty(groups).map_err(|e| CookieError::Export(e.to_string()))
    }

    /// Write a JSON snapshot to `path`.
    pub fn save_json(groups: &[CookieDomainGroup], path: &Path) -> Result<(), CookieError> {
        let json = to_json(groups)?;
        std::fs::write(path, json).map_err(|e| CookieError::Export(format!("{}: {e}", path.display())))
    }

    /// Read a snapshot written by [`save_json`].
    pub fn load_json(path: &Path) -> Result<Vec<CookieDomainGroup>, CookieError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| CookieError::Export(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&json).map_err(|e| CookieError::Export(e.to_string()))
    }
}

#[cfg(feature = "json")]
pub use json::{load_json, save_json, to_json};

impl CookieAggregator {
    /// The whole index as a Netscape cookie file, sorted by domain.
    pub fn export_netscape(&self, domain_filter: Option<&str>) -> String {
        to_netscape(&self.groups(), domain_filter)
    }

    #[cfg(feature = "json")]
    pub fn export_json(&self) -> Result<String, crate::base::cookieerror::CookieError> {
        to_json(&self.groups())
    }
}

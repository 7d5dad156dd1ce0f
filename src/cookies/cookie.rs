use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use time::OffsetDateTime;

/// Browsers whose cookie stores can be aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Browser {
    Safari,
    Chrome,
    Firefox,
}

impl Browser {
    pub const ALL: [Browser; 3] = [Browser::Safari, Browser::Chrome, Browser::Firefox];

    pub fn name(&self) -> &'static str {
        match self {
            Browser::Safari => "Safari",
            Browser::Chrome => "Chrome",
            Browser::Firefox => "Firefox",
        }
    }
}

impl fmt::Display for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cookie read from one browser's store.
///
/// Cookies are values: two cookies are equal when their domain, name, value,
/// version and secure flag match, regardless of which browser they came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    pub domain: String,
    pub name: String,
    pub value: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// 0 = Netscape, 1 = RFC 2965, anything else is preserved as-is.
    pub version: u32,
    #[serde(with = "time::serde::timestamp::option")]
    pub expiry: Option<OffsetDateTime>,
    #[serde(with = "time::serde::timestamp")]
    pub creation: OffsetDateTime,
    /// Only present for RFC 2965 (or later) cookies.
    pub comment: Option<String>,
    pub browser: Browser,
    /// Stable row identity in a table-backed store, used to target deletes.
    pub row_id: Option<i64>,
}

impl Cookie {
    pub fn new(
        browser: Browser,
        domain: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
        path: impl Into<String>,
        creation: OffsetDateTime,
    ) -> Self {
        Self {
            domain: domain.into(),
            name: name.into(),
            value: value.into(),
            path: path.into(),
            secure: false,
            http_only: false,
            version: 0,
            expiry: None,
            creation,
            comment: None,
            browser,
            row_id: None,
        }
    }

    pub fn with_flags(mut self, secure: bool, http_only: bool) -> Self {
        self.secure = secure;
        self.http_only = http_only;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        if version == 0 {
            self.comment = None;
        }
        self
    }

    pub fn with_expiry(mut self, expiry: Option<OffsetDateTime>) -> Self {
        self.expiry = expiry;
        self
    }

    /// Comments are dropped for version 0 cookies.
    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = if self.version >= 1 { comment } else { None };
        self
    }

    pub fn with_row_id(mut self, row_id: Option<i64>) -> Self {
        self.row_id = row_id;
        self
    }

    /// Session cookies have no expiry.
    pub fn is_session(&self) -> bool {
        self.expiry.is_none()
    }

    pub fn is_expired(&self, current_time: OffsetDateTime) -> bool {
        self.expiry.is_some_and(|expiry| expiry < current_time)
    }

    /// Every attribute equal, including the ones value equality ignores.
    pub fn is_identical(&self, other: &Cookie) -> bool {
        self == other
            && self.path == other.path
            && self.http_only == other.http_only
            && self.expiry == other.expiry
            && self.creation == other.creation
            && self.comment == other.comment
            && self.browser == other.browser
            && self.row_id == other.row_id
    }

    /// Same value and same origin store. Used when removing a specific cookie.
    pub(crate) fn is_same_entry(&self, other: &Cookie) -> bool {
        self == other && self.browser == other.browser && self.row_id == other.row_id
    }
}

impl PartialEq for Cookie {
    fn eq(&self, other: &Self) -> bool {
        self.domain == other.domain
            && self.name == other.name
            && self.value == other.value
            && self.version == other.version
            && self.secure == other.secure
    }
}

impl Eq for Cookie {}

impl Hash for Cookie {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.domain.hash(state);
        self.name.hash(state);
        self.value.hash(state);
        self.version.hash(state);
        self.secure.hash(state);
    }
}

/// All cookies sharing one domain string, across every browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieDomainGroup {
    domain: String,
    cookies: Vec<Cookie>,
    primary_version: Option<u32>,
}

impl CookieDomainGroup {
    pub fn new(domain: impl Into<String>) -> Self {
        Self { domain: domain.into(), cookies: Vec::new(), primary_version: None }
    }

    pub fn with_cookies(domain: impl Into<String>, cookies: Vec<Cookie>) -> Self {
        let mut group = Self::new(domain);
        group.cookies.reserve(cookies.len());
        for cookie in cookies {
            group.add_cookie(cookie);
        }
        group
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn into_cookies(self) -> Vec<Cookie> {
        self.cookies
    }

    /// Version of the first cookie ever added to this group.
    pub fn primary_version(&self) -> Option<u32> {
        self.primary_version
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn add_cookie(&mut self, cookie: Cookie) {
        if self.primary_version.is_none() {
            self.primary_version = Some(cookie.version);
        }
        self.cookies.push(cookie);
    }

    pub fn extend(&mut self, cookies: impl IntoIterator<Item = Cookie>) {
        for cookie in cookies {
            self.add_cookie(cookie);
        }
    }

    pub fn cookies_from(&self, browser: Browser) -> impl Iterator<Item = &Cookie> + '_ {
        self.cookies.iter().filter(move |c| c.browser == browser)
    }

    /// Browsers contributing at least one cookie, in first-seen order.
    pub fn browsers(&self) -> Vec<Browser> {
        let mut browsers = Vec::new();
        for cookie in &self.cookies {
            if !browsers.contains(&cookie.browser) {
                browsers.push(cookie.browser);
            }
        }
        browsers
    }

    pub fn has_secure_cookie(&self) -> bool {
        self.cookies.iter().any(|c| c.secure)
    }

    /// Replace everything `browser` contributed with `cookies`.
    ///
    /// Returns `None` when the browser's contribution is already identical to
    /// `cookies` (same order, every attribute), otherwise the
    /// `(removed, added)` counts.
    pub fn replace_browser(
        &mut self,
        browser: Browser,
        cookies: Vec<Cookie>,
    ) -> Option<(usize, usize)> {
        let current: Vec<&Cookie> = self.cookies_from(browser).collect();
        if current.len() == cookies.len()
            && current.iter().zip(&cookies).all(|(a, b)| a.is_identical(b))
        {
            return None;
        }
        let removed = self.remove_browser(browser);
        let added = cookies.len();
        self.extend(cookies);
        Some((removed, added))
    }

    /// Drop every cookie `browser` contributed, returning how many went.
    pub fn remove_browser(&mut self, browser: Browser) -> usize {
        let before = self.cookies.len();
        self.cookies.retain(|c| c.browser != browser);
        before - self.cookies.len()
    }

    /// Remove one specific cookie (same value, browser and row id).
    pub fn remove_cookie(&mut self, cookie: &Cookie) -> bool {
        match self.cookies.iter().position(|c| c.is_same_entry(cookie)) {
            Some(idx) => {
                self.cookies.remove(idx);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(browser: Browser, name: &str, value: &str) -> Cookie {
        Cookie::new(browser, "example.com", name, value, "/", OffsetDateTime::UNIX_EPOCH)
    }

    #[test]
    fn test_equality_ignores_path_and_browser() {
        let a = cookie(Browser::Safari, "sid", "1");
        let mut b = cookie(Browser::Chrome, "sid", "1");
        b.path = "/other".into();
        assert_eq!(a, b);

        let c = cookie(Browser::Safari, "sid", "1").with_flags(true, false);
        assert_ne!(a, c);
        let d = cookie(Browser::Safari, "sid", "1").with_version(1);
        assert_ne!(a, d);
    }

    #[test]
    fn test_comment_requires_rfc2965() {
        let legacy = cookie(Browser::Safari, "a", "b").with_comment(Some("hi".into()));
        assert_eq!(legacy.comment, None);

        let rfc = cookie(Browser::Safari, "a", "b")
            .with_version(1)
            .with_comment(Some("hi".into()));
        assert_eq!(rfc.comment.as_deref(), Some("hi"));
    }

    #[test]
    fn test_primary_version_is_first_added() {
        let mut group = CookieDomainGroup::new("example.com");
        assert_eq!(group.primary_version(), None);
        group.add_cookie(cookie(Browser::Safari, "a", "1").with_version(1));
        group.add_cookie(cookie(Browser::Safari, "b", "2"));
        assert_eq!(group.primary_version(), Some(1));
    }

    #[test]
    fn test_replace_browser_keeps_other_browsers() {
        let mut group = CookieDomainGroup::with_cookies(
            "example.com",
            vec![cookie(Browser::Safari, "s", "1"), cookie(Browser::Chrome, "c", "1")],
        );

        let outcome = group.replace_browser(Browser::Chrome, vec![cookie(Browser::Chrome, "c", "2")]);
        assert_eq!(outcome, Some((1, 1)));
        assert_eq!(group.len(), 2);
        assert_eq!(group.cookies_from(Browser::Safari).count(), 1);
        assert_eq!(group.cookies_from(Browser::Chrome).next().unwrap().value, "2");
    }

    #[test]
    fn test_replace_browser_unchanged_is_noop() {
        let mut group =
            CookieDomainGroup::with_cookies("example.com", vec![cookie(Browser::Chrome, "c", "1")]);
        let outcome = group.replace_browser(Browser::Chrome, vec![cookie(Browser::Chrome, "c", "1")]);
        assert_eq!(outcome, None);
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn test_replace_browser_sees_expiry_change() {
        let mut group =
            CookieDomainGroup::with_cookies("example.com", vec![cookie(Browser::Chrome, "c", "1")]);
        let renewed = cookie(Browser::Chrome, "c", "1")
            .with_expiry(Some(OffsetDateTime::UNIX_EPOCH + time::Duration::days(1)));
        assert_eq!(group.replace_browser(Browser::Chrome, vec![renewed]), Some((1, 1)));
        assert!(group.cookies()[0].expiry.is_some());
    }

    #[test]
    fn test_remove_cookie_matches_row_id() {
        let mut group = CookieDomainGroup::with_cookies(
            "example.com",
            vec![
                cookie(Browser::Firefox, "a", "1").with_row_id(Some(7)),
                cookie(Browser::Firefox, "a", "1").with_row_id(Some(8)),
            ],
        );
        assert!(group.remove_cookie(&cookie(Browser::Firefox, "a", "1").with_row_id(Some(8))));
        assert_eq!(group.len(), 1);
        assert_eq!(group.cookies()[0].row_id, Some(7));
        assert!(!group.remove_cookie(&cookie(Browser::Chrome, "a", "1").with_row_id(Some(7))));
    }

    #[test]
    fn test_browsers_first_seen_order() {
        let group = CookieDomainGroup::with_cookies(
            "example.com",
            vec![
                cookie(Browser::Chrome, "a", "1"),
                cookie(Browser::Safari, "b", "1"),
                cookie(Browser::Chrome, "c", "1"),
            ],
        );
        assert_eq!(group.browsers(), vec![Browser::Chrome, Browser::Safari]);
    }
}

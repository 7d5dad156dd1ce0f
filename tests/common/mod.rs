//! Shared fixtures: a binarycookies encoder, SQLite store builders and a
//! recording listener.
#![allow(dead_code)]

use cookiescope::cookies::{Browser, CookieDomainGroup, CookieListener};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const PAGE_HEADER: u32 = 0x0000_0100;
const RECORD_HEADER_LEN: usize = 56;

/// One record for [`encode_page`].
#[derive(Debug, Clone)]
pub struct TestCookie {
    pub domain: String,
    pub name: String,
    pub path: String,
    pub value: String,
    pub version: u32,
    pub flags: u32,
    pub comment: Option<String>,
    /// Seconds since 2001-01-01; `0.0` means session cookie.
    pub expiry: f64,
    pub creation: f64,
}

impl TestCookie {
    pub fn new(domain: &str, name: &str, value: &str) -> Self {
        Self {
            domain: domain.into(),
            name: name.into(),
            path: "/".into(),
            value: value.into(),
            version: 0,
            flags: 0,
            comment: None,
            expiry: 0.0,
            creation: 600_000_000.0,
        }
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn expiry(mut self, expiry: f64) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = path.into();
        self
    }
}

fn encode_record(cookie: &TestCookie) -> Vec<u8> {
    let mut strings = Vec::new();
    let offset_of = |s: &str, strings: &mut Vec<u8>| {
        let at = (RECORD_HEADER_LEN + strings.len()) as u32;
        strings.extend_from_slice(s.as_bytes());
        strings.push(0);
        at
    };
    let domain = offset_of(&cookie.domain, &mut strings);
    let name = offset_of(&cookie.name, &mut strings);
    let path = offset_of(&cookie.path, &mut strings);
    let value = offset_of(&cookie.value, &mut strings);
    let comment = match &cookie.comment {
        Some(c) => offset_of(c, &mut strings),
        None => 0,
    };

    let mut record = Vec::with_capacity(RECORD_HEADER_LEN + strings.len());
    record.extend_from_slice(&((RECORD_HEADER_LEN + strings.len()) as u32).to_le_bytes());
    record.extend_from_slice(&cookie.version.to_le_bytes());
    record.extend_from_slice(&cookie.flags.to_le_bytes());
    record.extend_from_slice(&0u32.to_le_bytes());
    for field in [domain, name, path, value, comment] {
        record.extend_from_slice(&field.to_le_bytes());
    }
    record.extend_from_slice(&0u32.to_le_bytes());
    record.extend_from_slice(&cookie.expiry.to_ne_bytes());
    record.extend_from_slice(&cookie.creation.to_ne_bytes());
    record.extend_from_slice(&strings);
    record
}

/// One page holding `cookies` in order.
pub fn encode_page(cookies: &[TestCookie]) -> Vec<u8> {
    let records: Vec<Vec<u8>> = cookies.iter().map(encode_record).collect();
    let header_len = 4 + 4 + 4 * records.len() + 4;

    let mut page = Vec::new();
    page.extend_from_slice(&PAGE_HEADER.to_be_bytes());
    page.extend_from_slice(&(records.len() as u32).to_le_bytes());
    let mut offset = header_len;
    for record in &records {
        page.extend_from_slice(&(offset as u32).to_le_bytes());
        offset += record.len();
    }
    page.extend_from_slice(&0u32.to_le_bytes());
    for record in &records {
        page.extend_from_slice(record);
    }
    page
}

/// A complete binarycookies file from encoded pages.
pub fn encode_file(pages: &[Vec<u8>]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"cook");
    data.extend_from_slice(&(pages.len() as u32).to_be_bytes());
    for page in pages {
        data.extend_from_slice(&(page.len() as u32).to_be_bytes());
    }
    for page in pages {
        data.extend_from_slice(page);
    }
    data
}

pub fn write_binary_store(path: &Path, pages: &[Vec<u8>]) {
    std::fs::write(path, encode_file(pages)).unwrap();
}

/// `(id, host, name, value, secure)`
pub type FirefoxRow<'a> = (i64, &'a str, &'a str, &'a str, bool);

/// (Re)create a `moz_cookies` database at `path` holding `rows`.
pub fn write_firefox_store(path: &Path, rows: &[FirefoxRow<'_>]) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "DROP TABLE IF EXISTS moz_cookies;
         CREATE TABLE moz_cookies (
            id INTEGER PRIMARY KEY, originAttributes TEXT NOT NULL DEFAULT '',
            name TEXT, value TEXT, host TEXT, path TEXT, expiry INTEGER,
            lastAccessed INTEGER, creationTime INTEGER, isSecure INTEGER, isHttpOnly INTEGER
         );",
    )
    .unwrap();
    for (id, host, name, value, secure) in rows {
        conn.execute(
            "INSERT INTO moz_cookies (id, name, value, host, path, expiry, lastAccessed, creationTime, isSecure, isHttpOnly)
             VALUES (?1, ?2, ?3, ?4, '/', 1900000000, 0, 1700000000, ?5, 0)",
            params![id, name, value, host, secure],
        )
        .unwrap();
    }
}

/// `(creation_utc, host_key, name, value, secure)`
pub type ChromeRow<'a> = (i64, &'a str, &'a str, &'a str, bool);

/// WebKit time (µs since 1601) of Unix second 1_700_000_000.
pub const CHROME_CREATION_BASE: i64 = 13_344_473_600_000_000;

/// (Re)create a current-schema Chrome `cookies` database at `path`.
pub fn write_chrome_store(path: &Path, rows: &[ChromeRow<'_>]) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "DROP TABLE IF EXISTS cookies;
         CREATE TABLE cookies (
            creation_utc INTEGER NOT NULL, host_key TEXT NOT NULL, top_frame_site_key TEXT NOT NULL DEFAULT '',
            name TEXT NOT NULL, value TEXT NOT NULL, encrypted_value BLOB NOT NULL DEFAULT x'',
            path TEXT NOT NULL, expires_utc INTEGER NOT NULL, is_secure INTEGER NOT NULL,
            is_httponly INTEGER NOT NULL, last_access_utc INTEGER NOT NULL DEFAULT 0
         );",
    )
    .unwrap();
    for (creation, host, name, value, secure) in rows {
        conn.execute(
            "INSERT INTO cookies (creation_utc, host_key, name, value, path, expires_utc, is_secure, is_httponly)
             VALUES (?1, ?2, ?3, ?4, '/', 0, ?5, 1)",
            params![creation, host, name, value, secure],
        )
        .unwrap();
    }
}

pub fn count_rows(path: &Path, table: &str) -> i64 {
    let conn = Connection::open(path).unwrap();
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Started,
    Finished,
    Progress(f64),
    Updated(String),
    Lost(String, Browser),
    Stopped(Browser),
    IndexChanged,
}

/// Listener that records every callback.
#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<Recorded>>,
}

impl Recorder {
    fn push(&self, event: Recorded) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: &Recorded) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == wanted).count()
    }

    pub fn contains(&self, wanted: &Recorded) -> bool {
        self.count(wanted) > 0
    }
}

impl CookieListener for Recorder {
    fn on_parsing_started(&self) {
        self.push(Recorded::Started);
    }

    fn on_parsing_finished(&self) {
        self.push(Recorded::Finished);
    }

    fn on_progress(&self, fraction: f64) {
        self.push(Recorded::Progress(fraction));
    }

    fn on_domain_updated(&self, group: &CookieDomainGroup) {
        self.push(Recorded::Updated(group.domain().to_string()));
    }

    fn on_domain_lost(&self, domain: &str, browser: Browser) {
        self.push(Recorded::Lost(domain.to_string(), browser));
    }

    fn on_source_stopped(&self, browser: Browser) {
        self.push(Recorded::Stopped(browser));
    }

    fn on_index_changed(&self) {
        self.push(Recorded::IndexChanged);
    }
}

/// Poll `condition` until it holds, failing the test after 10 seconds.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

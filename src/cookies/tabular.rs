//! Cookie extraction from table-backed stores (Chrome/Firefox SQLite databases).
//!
//! [`TabularCookieReader`] is browser-agnostic: it is configured with a
//! [`ColumnMap`] and pulls rows from any [`RowSource`]. [`SqliteRowSource`] is
//! the production row source.

use crate::base::cookieerror::CookieError;
use crate::cookies::cookie::{Browser, Cookie, CookieDomainGroup};
use crate::cookies::schema::{quote_ident, ColumnMap};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Maximum number of row ids bound into a single `DELETE ... IN (...)`.
const DELETE_CHUNK: usize = 500;

/// One raw row, before timestamp decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct CookieRow {
    /// `None` when the column is NULL; such rows are skipped.
    pub domain: Option<String>,
    pub name: String,
    pub value: String,
    pub path: String,
    /// Raw integer stamps; see [`TimeEncoding`](crate::cookies::schema::TimeEncoding).
    pub expiry: i64,
    pub creation: i64,
    pub secure: bool,
    pub http_only: bool,
    pub row_id: Option<i64>,
}

/// A table of cookie rows.
pub trait RowSource {
    /// Number of rows in the table, NULL domains included.
    fn count(&mut self, columns: &ColumnMap) -> Result<usize, CookieError>;

    /// Visit every row in ascending domain order.
    fn for_each_row(
        &mut self,
        columns: &ColumnMap,
        visit: &mut dyn FnMut(CookieRow),
    ) -> Result<(), CookieError>;

    fn has_column(&mut self, table: &str, column: &str) -> Result<bool, CookieError>;

    /// Delete every row whose row id is in `ids`, atomically. Returns the
    /// number of rows removed.
    fn delete_rows(&mut self, columns: &ColumnMap, ids: &[i64]) -> Result<usize, CookieError>;
}

/// [`RowSource`] over a SQLite database file.
pub struct SqliteRowSource {
    conn: Connection,
    path: PathBuf,
}

impl SqliteRowSource {
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self, CookieError> {
        Self::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    }

    pub fn open_read_write(path: impl AsRef<Path>) -> Result<Self, CookieError> {
        Self::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    }

    fn open_with_flags(path: &Path, flags: OpenFlags) -> Result<Self, CookieError> {
        let conn = Connection::open_with_flags(path, flags)?;
        Ok(Self { conn, path: path.to_path_buf() })
    }

    /// Wrap an existing connection (e.g. an in-memory database).
    pub fn from_connection(conn: Connection) -> Self {
        let path = conn.path().map(PathBuf::from).unwrap_or_default();
        Self { conn, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RowSource for SqliteRowSource {
    fn count(&mut self, columns: &ColumnMap) -> Result<usize, CookieError> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&columns.table));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    fn for_each_row(
        &mut self,
        columns: &ColumnMap,
        visit: &mut dyn FnMut(CookieRow),
    ) -> Result<(), CookieError> {
        let select = columns
            .select_columns()
            .into_iter()
            .map(quote_ident)
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {select} FROM {} ORDER BY {}",
            quote_ident(&columns.table),
            quote_ident(&columns.domain)
        );
        let has_row_id = columns.row_id.is_some();

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            visit(CookieRow {
                domain: row.get::<_, Option<String>>(0)?,
                name: text(row.get(1)?),
                value: text(row.get(2)?),
                path: text(row.get(3)?),
                expiry: timestamp(row.get(4)?),
                creation: timestamp(row.get(5)?),
                secure: timestamp(row.get(6)?) != 0,
                http_only: timestamp(row.get(7)?) != 0,
                row_id: if has_row_id { integer(row.get(8)?) } else { None },
            });
        }
        Ok(())
    }

    fn has_column(&mut self, table: &str, column: &str) -> Result<bool, CookieError> {
        let sql = format!("PRAGMA table_info({})", quote_ident(table));
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            if name == column {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn delete_rows(&mut self, columns: &ColumnMap, ids: &[i64]) -> Result<usize, CookieError> {
        let Some(row_id) = &columns.row_id else {
            return Err(CookieError::Database(format!(
                "table {} has no row id column",
                columns.table
            )));
        };
        if ids.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        let mut removed = 0;
        for chunk in ids.chunks(DELETE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "DELETE FROM {} WHERE {} IN ({placeholders})",
                quote_ident(&columns.table),
                quote_ident(row_id)
            );
            removed += tx.execute(&sql, params_from_iter(chunk.iter()))?;
        }
        tx.commit()?;
        Ok(removed)
    }
}

fn text(value: Value) -> String {
    match value {
        Value::Text(s) => s,
        Value::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Null => String::new(),
    }
}

/// Integer column value; anything unreadable counts as 0.
fn timestamp(value: Value) -> i64 {
    integer(value).unwrap_or(0)
}

fn integer(value: Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(i),
        Value::Real(r) if r.is_finite() => Some(r as i64),
        Value::Text(s) => {
            let s = s.trim();
            s.parse().ok().or_else(|| s.parse::<f64>().ok().filter(|r| r.is_finite()).map(|r| r as i64))
        }
        _ => None,
    }
}

/// Turns the rows of a cookie table into per-domain groups.
#[derive(Debug, Clone)]
pub struct TabularCookieReader {
    browser: Browser,
    columns: ColumnMap,
}

impl TabularCookieReader {
    pub fn new(browser: Browser, columns: ColumnMap) -> Self {
        Self { browser, columns }
    }

    /// Reader for a Chrome database, picking the column layout the file uses.
    pub fn detect_chrome(source: &mut dyn RowSource) -> Result<Self, CookieError> {
        let modern = ColumnMap::chrome_modern();
        let columns = if source
            .has_column(&modern.table, &modern.secure)
            .map_err(|e| e.for_browser(Browser::Chrome))?
        {
            modern
        } else {
            ColumnMap::chrome()
        };
        Ok(Self::new(Browser::Chrome, columns))
    }

    pub fn firefox() -> Self {
        Self::new(Browser::Firefox, ColumnMap::firefox())
    }

    pub fn browser(&self) -> Browser {
        self.browser
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    /// Read every row, grouping consecutive rows that share a domain.
    ///
    /// `on_row` receives `1 / count` for each row visited, including rows
    /// skipped for a NULL domain.
    pub fn read(
        &self,
        source: &mut dyn RowSource,
        on_row: &mut dyn FnMut(f64),
    ) -> Result<Vec<CookieDomainGroup>, CookieError> {
        let count = source.count(&self.columns).map_err(|e| e.for_browser(self.browser))?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let unit = 1.0 / count as f64;

        let mut groups: Vec<CookieDomainGroup> = Vec::new();
        let mut current: Option<CookieDomainGroup> = None;
        let mut skipped = 0usize;

        source
            .for_each_row(&self.columns, &mut |mut row| {
                on_row(unit);
                let Some(domain) = row.domain.take() else {
                    skipped += 1;
                    return;
                };
                let cookie = self.cookie_from_row(domain, row);
                match current.as_mut() {
                    Some(group) if group.domain() == cookie.domain => group.add_cookie(cookie),
                    _ => {
                        let mut group = CookieDomainGroup::new(cookie.domain.clone());
                        group.add_cookie(cookie);
                        groups.extend(current.replace(group));
                    }
                }
            })
            .map_err(|e| e.for_browser(self.browser))?;
        groups.extend(current);

        if skipped > 0 {
            tracing::debug!(browser = %self.browser, skipped, "Skipped rows with no domain");
        }
        Ok(groups)
    }

    fn cookie_from_row(&self, domain: String, row: CookieRow) -> Cookie {
        let creation = self
            .columns
            .creation_encoding
            .decode(row.creation)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        Cookie::new(self.browser, domain, row.name, row.value, row.path, creation)
            .with_flags(row.secure, row.http_only)
            .with_expiry(self.columns.expiry_encoding.decode(row.expiry))
            .with_row_id(row.row_id)
    }

    /// Delete the given row ids in one transaction.
    pub fn delete(&self, source: &mut dyn RowSource, ids: &[i64]) -> Result<usize, CookieError> {
        source.delete_rows(&self.columns, ids).map_err(|e| match e {
            CookieError::Database(message) => {
                CookieError::OperationFailed { browser: self.browser, message }
            }
            other => other.for_browser(self.browser),
        })
    }
}

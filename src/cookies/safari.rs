//! Safari binary cookies decoder (`Cookies.binarycookies`).
//!
//! ## File Format
//! 1. Header: `"cook"` magic, page count (u32 BE), one page size per page (u32 BE)
//! 2. Pages, back to back, each holding:
//!    - page header `0x00000100` (u32 BE)
//!    - cookie count (u32 LE) and that many record offsets (u32 LE, page-relative)
//!    - terminator `0` (u32 LE)
//!    - cookie records
//! 3. Footer: checksum (ignored)
//!
//! Each record is a run of little-endian u32 fields (size, version, flags,
//! padding, domain/name/path/value offsets, comment offset, end marker)
//! followed by expiry and creation dates as native doubles counted from the
//! Mac epoch. String offsets are relative to the start of the record.
//!
//! File-level damage (bad magic, truncated page table) fails the decode. A
//! damaged page or record is skipped so one bad page cannot hide the rest of
//! the store.
//!
//! ## References
//! - https://github.com/libyal/dtformats/blob/main/documentation/Safari%20Cookies.asciidoc

use crate::base::cookieerror::CookieError;
use crate::cookies::bytecursor::{epoch_to_timestamp, ByteCursor, Endian, MAC_EPOCH_OFFSET_SECS};
use crate::cookies::cookie::{Browser, Cookie, CookieDomainGroup};
use bytes::Bytes;
use time::OffsetDateTime;

/// Magic bytes at the start of a Safari binary cookies file.
pub const MAGIC: &[u8; 4] = b"cook";

/// Every page starts with this value.
pub const PAGE_HEADER: u32 = 0x0000_0100;

/// Fixed-size part of a cookie record, before its strings.
pub const RECORD_HEADER_LEN: usize = 56;

const FLAG_SECURE: u32 = 1;
const FLAG_HTTP_ONLY: u32 = 4;

/// Decode a Safari binary cookies file into per-domain groups.
pub fn decode_binary_cookies(data: impl Into<Bytes>) -> Result<Vec<CookieDomainGroup>, CookieError> {
    BinaryCookieDecoder::new().decode(data)
}

/// Decoder for the paged binary cookie format.
///
/// Groups are formed from runs of consecutive records sharing a domain within
/// one page. A domain that shows up again later in the file produces another
/// group; merging by domain is left to the caller.
#[derive(Debug, Clone)]
pub struct BinaryCookieDecoder {
    browser: Browser,
}

impl Default for BinaryCookieDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryCookieDecoder {
    pub fn new() -> Self {
        Self { browser: Browser::Safari }
    }

    /// Tag decoded cookies with another browser (WebKit embedders share the format).
    pub fn for_browser(browser: Browser) -> Self {
        Self { browser }
    }

    pub fn browser(&self) -> Browser {
        self.browser
    }

    pub fn decode(&self, data: impl Into<Bytes>) -> Result<Vec<CookieDomainGroup>, CookieError> {
        self.decode_with_progress(data, &mut |_| {})
    }

    /// Decode, calling `on_page` with `1 / page_count` once per page.
    pub fn decode_with_progress(
        &self,
        data: impl Into<Bytes>,
        on_page: &mut dyn FnMut(f64),
    ) -> Result<Vec<CookieDomainGroup>, CookieError> {
        let file = ByteCursor::new(data);
        let pages = read_page_table(&file)?;
        let unit = if pages.is_empty() { 0.0 } else { 1.0 / pages.len() as f64 };

        let mut groups = Vec::new();
        for (index, page) in pages.iter().enumerate() {
            if let Err(e) = self.decode_page(page, &mut groups) {
                tracing::debug!(page = index, error = %e, "skipping malformed cookie page");
            }
            on_page(unit);
        }
        Ok(groups)
    }

    fn decode_page(
        &self,
        page: &ByteCursor,
        groups: &mut Vec<CookieDomainGroup>,
    ) -> Result<(), CookieError> {
        let mut header = page.clone();
        let magic = header.next_u32(Endian::Big)?;
        if magic != PAGE_HEADER {
            return Err(CookieError::format(format!("bad page header {magic:#010x}")));
        }

        let count = header.next_u32(Endian::Little)? as usize;
        if count.saturating_mul(4) > header.remaining() {
            return Err(CookieError::format(format!("cookie count {count} exceeds page")));
        }
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(header.next_u32(Endian::Little)? as usize);
        }

        let terminator = header.next_u32(Endian::Little)?;
        if terminator != 0 {
            return Err(CookieError::format("page header not terminated"));
        }

        // A page boundary always closes the current group.
        let mut current: Option<CookieDomainGroup> = None;
        for offset in offsets {
            let cookie = match self.decode_record(page, offset) {
                Ok(cookie) => cookie,
                Err(e) => {
                    tracing::debug!(offset, error = %e, "skipping malformed cookie record");
                    continue;
                }
            };

            match current.as_mut() {
                Some(group) if group.domain() == cookie.domain => group.add_cookie(cookie),
                _ => {
                    if let Some(done) = current.take() {
                        groups.push(done);
                    }
                    let mut group = CookieDomainGroup::new(cookie.domain.clone());
                    group.add_cookie(cookie);
                    current = Some(group);
                }
            }
        }
        groups.extend(current);
        Ok(())
    }

    fn decode_record(&self, page: &ByteCursor, offset: usize) -> Result<Cookie, CookieError> {
        // Bounds-check the whole fixed part up front.
        page.read_bytes(offset, RECORD_HEADER_LEN)?;

        let mut record = page.clone();
        record.set_position(offset);

        let _size = record.next_u32(Endian::Little)?;
        let version = record.next_u32(Endian::Little)?;
        let flags = record.next_u32(Endian::Little)?;
        let (secure, http_only) = cookie_flags(flags);

        let padding = record.next_u32(Endian::Little)?;
        if padding != 0 {
            tracing::trace!(offset, padding, "non-zero cookie record padding");
        }

        let domain_offset = record.next_u32(Endian::Little)? as usize;
        let name_offset = record.next_u32(Endian::Little)? as usize;
        let path_offset = record.next_u32(Endian::Little)? as usize;
        let value_offset = record.next_u32(Endian::Little)? as usize;
        let comment_offset = record.next_u32(Endian::Little)? as usize;

        let end = record.next_u32(Endian::Little)?;
        if end != 0 {
            tracing::trace!(offset, end, "non-zero cookie record end marker");
        }

        let expiry_raw = record.next_f64()?;
        let creation_raw = record.next_f64()?;

        let string_at = |field: usize| -> Result<String, CookieError> {
            let at = offset.checked_add(field).ok_or(CookieError::OutOfBounds {
                offset,
                needed: field,
                len: page.len(),
            })?;
            page.read_cstring(at)
        };

        let domain = string_at(domain_offset)?;
        let name = string_at(name_offset)?;
        let path = string_at(path_offset)?;
        let value = string_at(value_offset)?;
        let comment = if comment_offset != 0 { Some(string_at(comment_offset)?) } else { None };

        let creation = epoch_to_timestamp(creation_raw).unwrap_or(mac_epoch());
        let expiry = if expiry_raw > 0.0 { epoch_to_timestamp(expiry_raw) } else { None };

        Ok(Cookie::new(self.browser, domain, name, value, path, creation)
            .with_flags(secure, http_only)
            .with_version(version)
            .with_expiry(expiry)
            .with_comment(comment))
    }
}

/// Split the file into page cursors using the page size table.
fn read_page_table(file: &ByteCursor) -> Result<Vec<ByteCursor>, CookieError> {
    let magic = file
        .read_bytes(0, 4)
        .map_err(|_| CookieError::format("file too small"))?;
    if magic != MAGIC {
        return Err(CookieError::format("invalid magic bytes (not a binary cookies file)"));
    }

    let mut cursor = file.clone();
    cursor.set_position(4);
    let page_count = cursor
        .next_u32(Endian::Big)
        .map_err(|_| CookieError::format("missing page count"))? as usize;

    if page_count.saturating_mul(4) > cursor.remaining() {
        return Err(CookieError::format(format!("page size table for {page_count} pages is truncated")));
    }
    let mut sizes = Vec::with_capacity(page_count);
    for _ in 0..page_count {
        sizes.push(cursor.next_u32(Endian::Big)? as usize);
    }

    let mut pages = Vec::with_capacity(page_count);
    let mut start = cursor.position();
    for (index, size) in sizes.into_iter().enumerate() {
        let page = file
            .slice(start, size)
            .map_err(|_| CookieError::format(format!("page {index} extends beyond file")))?;
        pages.push(page);
        start += size;
    }
    Ok(pages)
}

/// Map the record flag word to `(secure, http_only)`.
fn cookie_flags(flags: u32) -> (bool, bool) {
    match flags {
        0 => (false, false),
        FLAG_SECURE => (true, false),
        FLAG_HTTP_ONLY => (false, true),
        f if f == FLAG_SECURE | FLAG_HTTP_ONLY => (true, true),
        other => {
            tracing::debug!(flags = other, "unknown cookie flags, treating as none");
            (false, false)
        }
    }
}

fn mac_epoch() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(MAC_EPOCH_OFFSET_SECS).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

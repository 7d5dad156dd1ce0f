//! Bounds-checked reader over an immutable byte buffer.
//!
//! Supports both random access (`read_*` at an explicit offset) and
//! sequential access (`next_*` from the current position). Sub-ranges are
//! cheap: [`ByteCursor::slice`] shares the underlying [`Bytes`].

use crate::base::cookieerror::CookieError;
use bytes::Bytes;
use time::OffsetDateTime;

/// Seconds between the Unix epoch and the Mac epoch (2001-01-01T00:00:00Z).
pub const MAC_EPOCH_OFFSET_SECS: i64 = 978_307_200;

/// Byte order of a fixed-width integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    Little,
}

#[derive(Debug, Clone)]
pub struct ByteCursor {
    buf: Bytes,
    pos: usize,
}

impl ByteCursor {
    pub fn new(buf: impl Into<Bytes>) -> Self {
        Self { buf: buf.into(), pos: 0 }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn check(&self, offset: usize, needed: usize) -> Result<(), CookieError> {
        match offset.checked_add(needed) {
            Some(end) if end <= self.buf.len() => Ok(()),
            _ => Err(CookieError::OutOfBounds { offset, needed, len: self.buf.len() }),
        }
    }

    /// A new cursor over `len` bytes starting at `offset`, positioned at 0.
    pub fn slice(&self, offset: usize, len: usize) -> Result<ByteCursor, CookieError> {
        self.check(offset, len)?;
        Ok(ByteCursor::new(self.buf.slice(offset..offset + len)))
    }

    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<&[u8], CookieError> {
        self.check(offset, len)?;
        Ok(&self.buf[offset..offset + len])
    }

    pub fn read_u32(&self, offset: usize, endian: Endian) -> Result<u32, CookieError> {
        self.check(offset, 4)?;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.buf[offset..offset + 4]);
        Ok(match endian {
            Endian::Big => u32::from_be_bytes(raw),
            Endian::Little => u32::from_le_bytes(raw),
        })
    }

    /// Eight bytes copied verbatim into a native `f64`, with no byte swapping.
    pub fn read_f64(&self, offset: usize) -> Result<f64, CookieError> {
        self.check(offset, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.buf[offset..offset + 8]);
        Ok(f64::from_ne_bytes(raw))
    }

    /// The string starting at `offset` up to (not including) the first NUL.
    ///
    /// Multi-byte UTF-8 sequences are decoded as whole codepoints; invalid
    /// sequences become U+FFFD. A string with no terminator runs to the end of
    /// the buffer.
    pub fn read_cstring(&self, offset: usize) -> Result<String, CookieError> {
        self.check(offset, 1)?;
        let tail = &self.buf[offset..];
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
    }

    pub fn next_u32(&mut self, endian: Endian) -> Result<u32, CookieError> {
        let value = self.read_u32(self.pos, endian)?;
        self.pos += 4;
        Ok(value)
    }

    pub fn next_f64(&mut self) -> Result<f64, CookieError> {
        let value = self.read_f64(self.pos)?;
        self.pos += 8;
        Ok(value)
    }
}

/// Convert seconds since the Mac epoch to a timestamp.
///
/// Returns `None` for values that are not finite or that fall outside the
/// representable range.
pub fn epoch_to_timestamp(raw: f64) -> Option<OffsetDateTime> {
    if !raw.is_finite() {
        return None;
    }
    let unix_nanos = (raw + MAC_EPOCH_OFFSET_SECS as f64) * 1_000_000_000.0;
    if !(i128::MIN as f64..=i128::MAX as f64).contains(&unix_nanos) {
        return None;
    }
    OffsetDateTime::from_unix_timestamp_nanos(unix_nanos as i128).ok()
}

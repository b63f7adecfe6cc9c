//! HTTP range-backed random access over the remote file.
//!
//! Works against any stock HTTP server that honors byte-range requests: one
//! GET per [`HttpRangeSource::request`], no retries, no timeouts. A single
//! cached extent backs `Read`, so the assembler's sequential copies after a
//! `request` never touch the network again.

use std::io::{self, Read, Seek, SeekFrom};

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, RANGE};
use reqwest::StatusCode;
use tracing::debug;

use crate::error::{Result, SyncError};

/// Seekable reader over a remote URL, one cached extent at a time.
pub struct HttpRangeSource {
    url: String,
    size: u64,
    offset: u64,
    cache_begin: u64,
    cache_end: u64,
    cache: Vec<u8>,
    client: Client,
}

impl HttpRangeSource {
    /// Create a source for a remote file of `size` bytes at `url`.
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL of the remote file
    /// * `size` - Remote file length in bytes, from the control
    ///
    /// # Example
    ///
    /// ```rust
    /// use blocksync::HttpRangeSource;
    ///
    /// let source = HttpRangeSource::new("http://example.com/file.iso", 1 << 20);
    /// assert_eq!(source.offset(), 0);
    /// assert_eq!(source.size(), 1 << 20);
    /// ```
    #[must_use]
    pub fn new(url: impl Into<String>, size: u64) -> Self {
        Self {
            url: url.into(),
            size,
            offset: 0,
            cache_begin: 0,
            cache_end: 0,
            cache: Vec::new(),
            client: Client::new(),
        }
    }

    /// Current logical offset.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Size of the remote file.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Fetch `[offset, offset + size)` with a single ranged GET and cache
    /// it.
    ///
    /// # Arguments
    ///
    /// * `size` - Bytes to fetch, starting at the current offset
    ///
    /// # Example
    ///
    /// ```no_run
    /// use blocksync::HttpRangeSource;
    /// use std::io::{Read, Seek, SeekFrom};
    ///
    /// let mut source = HttpRangeSource::new("http://example.com/file.iso", 1 << 20);
    /// source.seek(SeekFrom::Start(4096)).unwrap();
    /// source.request(2048).unwrap();
    ///
    /// // Reads now come from the cached extent.
    /// let mut buf = [0u8; 512];
    /// source.read_exact(&mut buf).unwrap();
    /// ```
    ///
    /// # Errors
    ///
    /// - [`SyncError::UrlNotFound`] on 404.
    /// - [`SyncError::RangeNotSupported`] on any other non-206 status.
    /// - [`SyncError::CompressedResponse`] when the response carries a gzip
    ///   content coding (ranges over coded bodies are ambiguous).
    /// - [`SyncError::RangeSizeMismatch`] when the body length differs from
    ///   the request.
    /// - [`SyncError::Transport`] on connect/send/body failures.
    pub fn request(&mut self, size: u64) -> Result<()> {
        let begin = self.offset;
        let end = begin + size;
        if size == 0 {
            self.cache.clear();
            self.cache_begin = begin;
            self.cache_end = begin;
            return Ok(());
        }
        debug!(begin, end, "requesting range");

        let response = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={}-{}", begin, end - 1))
            .header(ACCEPT_ENCODING, "identity")
            .send()?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SyncError::UrlNotFound(self.url.clone()));
        }
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(SyncError::RangeNotSupported {
                status: status.as_u16(),
            });
        }
        let gzipped = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|encoding| encoding.contains("gzip"));
        if gzipped {
            return Err(SyncError::CompressedResponse);
        }

        let body = response.bytes()?;
        if body.len() as u64 != size {
            return Err(SyncError::RangeSizeMismatch {
                got: body.len() as u64,
                expected: size,
            });
        }

        self.cache_begin = begin;
        self.cache_end = end;
        self.cache = body.to_vec();
        Ok(())
    }
}

impl Seek for HttpRangeSource {
    /// Update the logical offset; performs no I/O.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
        };
        match target {
            Some(offset) => {
                self.offset = offset;
                Ok(offset)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before byte 0",
            )),
        }
    }
}

impl Read for HttpRangeSource {
    /// Serve from the cached extent, issuing a new range request when the
    /// wanted window lies outside it.
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }
        let wanted_end = self.offset + dst.len() as u64;
        if self.cache.is_empty() || self.offset < self.cache_begin || wanted_end > self.cache_end {
            self.request(dst.len() as u64).map_err(io::Error::other)?;
        }

        #[allow(clippy::cast_possible_truncation)]
        let start = (self.offset - self.cache_begin) as usize;
        #[allow(clippy::cast_possible_truncation)]
        let available = (self.cache_end - self.offset) as usize;
        let n = dst.len().min(available);
        dst[..n].copy_from_slice(&self.cache[start..start + n]);
        self.offset += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seek_start_and_current() {
        let mut source = HttpRangeSource::new("http://example.com/f", 100);
        assert_eq!(source.seek(SeekFrom::Start(40)).unwrap(), 40);
        assert_eq!(source.offset(), 40);
        assert_eq!(source.seek(SeekFrom::Current(5)).unwrap(), 45);
        assert_eq!(source.seek(SeekFrom::Current(-45)).unwrap(), 0);
    }

    #[test]
    fn seek_end_uses_remote_size() {
        let mut source = HttpRangeSource::new("http://example.com/f", 100);
        assert_eq!(source.seek(SeekFrom::End(-10)).unwrap(), 90);
        assert_eq!(source.offset(), 90);
    }

    #[test]
    fn seek_before_start_is_invalid() {
        let mut source = HttpRangeSource::new("http://example.com/f", 100);
        let err = source.seek(SeekFrom::Current(-1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn zero_size_request_skips_the_network() {
        let mut source = HttpRangeSource::new("http://unroutable.invalid/f", 100);
        source.request(0).unwrap();
    }
}

//! Response-line extraction.
//!
//! Backends answer in CGI style: header lines, a blank line, the body. The
//! front-end wants HTTP/1.1, so the server scans the buffered header region
//! for a `Status:` header and emits `HTTP/1.1 <code> <reason>` in front of
//! the backend's bytes, which are otherwise forwarded untouched. A response
//! that already leads with `HTTP/` is passed through as-is, so extraction
//! is idempotent.

use bytes::BytesMut;

/// Default cap on the buffered header region.
pub const DEFAULT_BUFFER_CAP: usize = 128 * 1024;

/// Status line assumed when the backend sends no `Status:` header.
pub const DEFAULT_STATUS_LINE: &str = "200 OK";

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Streaming filter that buffers backend output until the header region is
/// complete, then yields the status line and the buffered bytes.
///
/// Once [`feed`](StatusExtractor::feed) returns true, emit
/// [`status_line`](StatusExtractor::status_line) (unless
/// [`already_http`](StatusExtractor::already_http)) followed by
/// [`buffer`](StatusExtractor::buffer), and forward everything after that
/// verbatim.
#[derive(Debug)]
pub struct StatusExtractor {
    buffer: BytesMut,
    scan_from: usize,
    header_end: Option<usize>,
    cap: usize,
}

impl StatusExtractor {
    /// Creates an extractor with the default buffer cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer_cap(DEFAULT_BUFFER_CAP)
    }

    /// Creates an extractor that gives up searching after `cap` buffered
    /// bytes and treats everything buffered so far as the header region.
    #[must_use]
    pub fn with_buffer_cap(cap: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scan_from: 0,
            header_end: None,
            cap,
        }
    }

    /// Buffers `data`; returns true once the header region is complete.
    pub fn feed(&mut self, data: &[u8]) -> bool {
        if self.header_end.is_some() {
            return true;
        }
        self.buffer.extend_from_slice(data);

        // Resume the scan with enough overlap to catch a terminator split
        // across feeds.
        let start = self.scan_from.saturating_sub(HEADER_TERMINATOR.len() - 1);
        if let Some(pos) = find(&self.buffer[start..], HEADER_TERMINATOR) {
            self.header_end = Some(start + pos + HEADER_TERMINATOR.len());
            return true;
        }
        if self.buffer.len() >= self.cap {
            self.header_end = Some(self.buffer.len());
            return true;
        }
        self.scan_from = self.buffer.len();
        false
    }

    /// Whether the header region is complete.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.header_end.is_some()
    }

    /// Whether the backend bytes already begin with an HTTP response line.
    #[must_use]
    pub fn already_http(&self) -> bool {
        self.buffer.starts_with(b"HTTP/")
    }

    /// The status line for the synthetic response line: the value of the
    /// first `Status:` header (matched case-insensitively), or
    /// [`DEFAULT_STATUS_LINE`].
    #[must_use]
    pub fn status_line(&self) -> String {
        let region = &self.buffer[..self.header_end.unwrap_or(0)];
        for line in region.split_crlf() {
            if line.len() >= 7 && line[..7].eq_ignore_ascii_case(b"Status:") {
                let value = trim_ascii(&line[7..]);
                if !value.is_empty() {
                    return String::from_utf8_lossy(value).into_owned();
                }
            }
        }
        DEFAULT_STATUS_LINE.to_string()
    }

    /// Everything buffered so far, to be forwarded verbatim.
    #[must_use]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }
}

impl Default for StatusExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|byte| !byte.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|byte| !byte.is_ascii_whitespace())
        .map_or(start, |pos| pos + 1);
    &bytes[start..end]
}

/// Iterator over CRLF-separated lines of the header region.
trait SplitCrlf {
    fn split_crlf(&self) -> CrlfLines<'_>;
}

impl SplitCrlf for [u8] {
    fn split_crlf(&self) -> CrlfLines<'_> {
        CrlfLines { rest: self }
    }
}

struct CrlfLines<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for CrlfLines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.rest.is_empty() {
            return None;
        }
        match find(self.rest, b"\r\n") {
            Some(pos) => {
                let line = &self.rest[..pos];
                self.rest = &self.rest[pos + 2..];
                Some(line)
            }
            None => {
                let line = self.rest;
                self.rest = &[];
                Some(line)
            }
        }
    }
}

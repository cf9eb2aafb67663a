//! Streaming parser for the request-header block.
//!
//! The front-end frames request headers as an ASCII decimal length, a `:`,
//! that many bytes of `name\0value\0…`, then a `,`. The parser consumes
//! bytes incrementally and stops at the end of the envelope; whatever the
//! caller read past it is the start of the request body.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use bytes::{Bytes, BytesMut};

/// Upper bound on the declared header-block length.
pub const MAX_BLOCK_SIZE: usize = 1024 * 1024;

/// Parser progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Consuming the ASCII decimal length prefix.
    ReadingLength,
    /// Consuming the header block and its trailing comma.
    ReadingBlock,
    /// The whole envelope has been consumed; headers are available.
    Done,
    /// The input violated the envelope format. Terminal.
    Error,
}

/// Incremental request-header parser.
///
/// Feed bytes until [`accepting_input`](HeaderParser::accepting_input)
/// turns false, then check [`state`](HeaderParser::state): `Done` means the
/// headers parsed and the unconsumed tail of the last buffer is body data.
#[derive(Debug)]
pub struct HeaderParser {
    state: ParserState,
    declared_len: usize,
    length_digits: u32,
    block: BytesMut,
    pairs: Vec<(Bytes, Bytes)>,
}

impl HeaderParser {
    /// Creates a parser at the start of the envelope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ParserState::ReadingLength,
            declared_len: 0,
            length_digits: 0,
            block: BytesMut::new(),
            pairs: Vec::new(),
        }
    }

    /// Current parser state.
    #[must_use]
    pub const fn state(&self) -> ParserState {
        self.state
    }

    /// Whether the parser still wants bytes.
    #[must_use]
    pub const fn accepting_input(&self) -> bool {
        matches!(
            self.state,
            ParserState::ReadingLength | ParserState::ReadingBlock
        )
    }

    /// Consumes bytes from `data`; returns how many were consumed.
    ///
    /// Consumption stops at the end of the envelope (or at the offending
    /// byte on error), so body bytes in the same buffer stay untouched.
    pub fn feed(&mut self, data: &[u8]) -> usize {
        let mut consumed = 0;
        while consumed < data.len() {
            match self.state {
                ParserState::ReadingLength => match data[consumed] {
                    digit @ b'0'..=b'9' => {
                        self.declared_len =
                            self.declared_len * 10 + usize::from(digit - b'0');
                        self.length_digits += 1;
                        consumed += 1;
                        if self.declared_len > MAX_BLOCK_SIZE {
                            self.state = ParserState::Error;
                            return consumed;
                        }
                    }
                    b':' if self.length_digits > 0 => {
                        consumed += 1;
                        self.block.reserve(self.declared_len);
                        self.state = ParserState::ReadingBlock;
                    }
                    _ => {
                        self.state = ParserState::Error;
                        return consumed;
                    }
                },
                ParserState::ReadingBlock => {
                    if self.block.len() < self.declared_len {
                        let want = self.declared_len - self.block.len();
                        let take = want.min(data.len() - consumed);
                        self.block
                            .extend_from_slice(&data[consumed..consumed + take]);
                        consumed += take;
                        if self.block.len() < self.declared_len {
                            return consumed;
                        }
                    }
                    // Block complete; the envelope ends with a comma.
                    if consumed == data.len() {
                        return consumed;
                    }
                    if data[consumed] == b',' {
                        consumed += 1;
                        self.finish();
                    } else {
                        self.state = ParserState::Error;
                    }
                    return consumed;
                }
                ParserState::Done | ParserState::Error => return consumed,
            }
        }
        consumed
    }

    /// Splits the completed block into pairs; sets `Done` or `Error`.
    fn finish(&mut self) {
        if self.declared_len == 0 {
            self.state = ParserState::Done;
            return;
        }
        if self.block.last() != Some(&0) {
            self.state = ParserState::Error;
            return;
        }
        let fields: Vec<&[u8]> = self.block[..self.block.len() - 1]
            .split(|byte| *byte == 0)
            .collect();
        if fields.len() % 2 != 0 {
            self.state = ParserState::Error;
            return;
        }
        self.pairs = fields
            .chunks_exact(2)
            .map(|pair| {
                (
                    Bytes::copy_from_slice(pair[0]),
                    Bytes::copy_from_slice(pair[1]),
                )
            })
            .collect();
        self.state = ParserState::Done;
    }

    /// Looks a header up by exact name; duplicates resolve last-wins.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.pairs
            .iter()
            .rev()
            .find(|(header, _)| header.as_ref() == name.as_bytes())
            .map(|(_, value)| value.as_ref())
    }

    /// Whether the block contains `name`.
    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// The raw `name\0value\0…` block, for pass-through to the backend.
    #[must_use]
    pub fn header_data(&self) -> &[u8] {
        &self.block
    }

    /// All pairs in wire order.
    #[must_use]
    pub fn pairs(&self) -> &[(Bytes, Bytes)] {
        &self.pairs
    }

    /// `DOCUMENT_ROOT`, when present.
    #[must_use]
    pub fn document_root(&self) -> Option<PathBuf> {
        self.header("DOCUMENT_ROOT")
            .map(|value| PathBuf::from(OsStr::from_bytes(value)))
    }

    /// `CONTENT_LENGTH` with C `atol` semantics: optional leading ASCII
    /// whitespace, then leading decimal digits; absent or unparsable is 0.
    #[must_use]
    pub fn content_length(&self) -> u64 {
        parse_decimal_prefix(self.header("CONTENT_LENGTH").unwrap_or(b""))
    }

    /// Whether `PASSENGER_USE_GLOBAL_QUEUE` is the literal `true`.
    #[must_use]
    pub fn use_global_queue(&self) -> bool {
        self.header("PASSENGER_USE_GLOBAL_QUEUE") == Some(b"true")
    }

    /// `PASSENGER_ENVIRONMENT` as an opaque string, empty when absent.
    #[must_use]
    pub fn environment(&self) -> String {
        self.header_string("PASSENGER_ENVIRONMENT")
    }

    /// `PASSENGER_SPAWN_METHOD` as an opaque string, empty when absent.
    #[must_use]
    pub fn spawn_method(&self) -> String {
        self.header_string("PASSENGER_SPAWN_METHOD")
    }

    fn header_string(&self, name: &str) -> String {
        self.header(name)
            .map(|value| String::from_utf8_lossy(value).into_owned())
            .unwrap_or_default()
    }
}

impl Default for HeaderParser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_decimal_prefix(value: &[u8]) -> u64 {
    let digits = value
        .iter()
        .skip_while(|byte| byte.is_ascii_whitespace())
        .take_while(|byte| byte.is_ascii_digit());
    let mut parsed = 0u64;
    for digit in digits {
        parsed = parsed
            .saturating_mul(10)
            .saturating_add(u64::from(digit - b'0'));
    }
    parsed
}

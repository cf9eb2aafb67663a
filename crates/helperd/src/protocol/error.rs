//! Protocol-level error types.

use std::io;

use thiserror::Error;

/// Errors from framed channel I/O.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The peer closed the stream partway through a fixed-width read.
    #[error("unexpected end of stream after {got} of {wanted} bytes")]
    ShortRead {
        /// Bytes the caller asked for.
        wanted: usize,
        /// Bytes actually delivered before end-of-stream.
        got: usize,
    },

    /// An underlying I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

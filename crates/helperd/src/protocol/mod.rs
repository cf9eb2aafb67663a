//! Wire protocol between the front-end, the server, and the backend.
//!
//! Per connection the front-end sends the 64-byte secret, a length-prefixed
//! NUL-delimited header block, and `CONTENT_LENGTH` body bytes. The backend
//! answers in CGI style; [`status`] turns that into an HTTP/1.1 response.

pub mod channel;
pub mod error;
pub mod scgi;
pub mod status;

pub use channel::MessageChannel;
pub use error::ProtocolError;
pub use scgi::{HeaderParser, ParserState};
pub use status::StatusExtractor;

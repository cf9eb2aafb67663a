//! Request-handling workers.
//!
//! Every worker is a long-lived task looping over accept → authenticate →
//! parse → lease → stream body → stream response. Iterations are
//! independent: any per-connection failure is logged and the worker moves
//! on to its next accept. Only the supervisor's cancellation ends the loop.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use helperd_core::paths::{self, PathResolveError};
use helperd_core::pool::{ApplicationPool, PoolError, PoolOptions, PoolSession};

use crate::protocol::{HeaderParser, MessageChannel, ParserState, ProtocolError, StatusExtractor};
use crate::secret::{SharedSecret, SECRET_SIZE};

/// Read buffer for request headers and body chunks.
const REQUEST_BUF_SIZE: usize = 16 * 1024;

/// Read buffer for backend response chunks.
const RESPONSE_BUF_SIZE: usize = 32 * 1024;

/// Why one worker iteration gave up on its connection.
///
/// All variants are transient: the worker logs them and continues. Anything
/// that escapes this taxonomy is a programming error and takes the process
/// down.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The client did not present the correct password.
    #[error("client did not send a correct password")]
    BadPassword,

    /// The header envelope was malformed.
    #[error("invalid request header block")]
    InvalidHeaderBlock,

    /// The header block lacked the mandatory `DOCUMENT_ROOT`.
    #[error("DOCUMENT_ROOT header is missing")]
    MissingDocumentRoot,

    /// `DOCUMENT_ROOT/..` did not resolve to an application root.
    #[error(transparent)]
    AppRoot(#[from] PathResolveError),

    /// I/O with the client failed.
    #[error("cannot {action}: {source}")]
    Client {
        /// What the worker was doing with the client stream.
        action: &'static str,
        /// The underlying protocol or I/O error.
        #[source]
        source: ProtocolError,
    },

    /// I/O with the backend session failed.
    #[error("cannot {action}: {source}")]
    Backend {
        /// What the worker was doing with the backend session.
        action: &'static str,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The pool failed for a reason other than a spawn failure.
    #[error(transparent)]
    Pool(PoolError),
}

/// One member of the fixed worker set.
pub struct Worker {
    number: u32,
    listener: Arc<UnixListener>,
    secret: Arc<SharedSecret>,
    pool: Arc<dyn ApplicationPool>,
    shutdown: CancellationToken,
}

impl Worker {
    /// Creates worker `number` over the shared listener, secret, and pool.
    #[must_use]
    pub fn new(
        number: u32,
        listener: Arc<UnixListener>,
        secret: Arc<SharedSecret>,
        pool: Arc<dyn ApplicationPool>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            number,
            listener,
            secret,
            pool,
            shutdown,
        }
    }

    /// Runs the accept loop until the supervisor cancels it.
    pub async fn run(self) {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    debug!(worker = self.number, "worker interrupted");
                    return;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => self.serve_connection(stream).await,
                    Err(err) => {
                        error!(worker = self.number, error = %err, "cannot accept new connection");
                    }
                },
            }
        }
    }

    /// Handles one accepted connection; on interrupt the in-flight
    /// connection is abandoned (both descriptors close on drop).
    async fn serve_connection(&self, stream: UnixStream) {
        tokio::select! {
            () = self.shutdown.cancelled() => {
                debug!(worker = self.number, "in-flight connection abandoned on interrupt");
            }
            result = self.handle_request(stream) => {
                if let Err(err) = result {
                    error!(worker = self.number, error = %err, "request failed");
                }
            }
        }
    }

    /// One full request/response cycle on an authenticated connection.
    async fn handle_request(&self, stream: UnixStream) -> Result<(), RequestError> {
        let mut channel = MessageChannel::new(stream);

        self.authenticate(&mut channel).await?;

        let (parser, partial_body) = read_request_headers(&mut channel).await?;
        let document_root = parser
            .document_root()
            .ok_or(RequestError::MissingDocumentRoot)?;
        let app_root = paths::canonicalize_app_root(&document_root)?;

        let mut options = PoolOptions::new(app_root);
        options.use_global_queue = parser.use_global_queue();
        options.environment = parser.environment();
        options.spawn_method = parser.spawn_method();

        let mut session = match self.pool.get(options).await {
            Ok(session) => session,
            Err(PoolError::SpawnFailed {
                message,
                error_page,
            }) => {
                error!(worker = self.number, error = %message, "backend spawn failed");
                return write_spawn_failure(&mut channel, &message, error_page.as_deref())
                    .await
                    .map_err(|source| RequestError::Client {
                        action: "send spawn failure response",
                        source,
                    });
            }
            Err(err) => return Err(RequestError::Pool(err)),
        };

        forward_request(&mut channel, session.as_mut(), &parser, &partial_body).await?;
        forward_response(&mut channel, session.as_mut()).await?;

        // Dropping the session returns the backend to the pool; dropping the
        // channel closes the client descriptor.
        Ok(())
    }

    /// Reads and checks the connection password.
    async fn authenticate(
        &self,
        channel: &mut MessageChannel<UnixStream>,
    ) -> Result<(), RequestError> {
        let mut presented = [0u8; SECRET_SIZE];
        let filled = match channel.read_exact(&mut presented).await {
            Ok(filled) => filled,
            Err(ProtocolError::ShortRead { .. }) => false,
            Err(err) => {
                return Err(RequestError::Client {
                    action: "read password",
                    source: err,
                })
            }
        };
        if !filled || !self.secret.matches(&presented) {
            return Err(RequestError::BadPassword);
        }
        Ok(())
    }
}

/// Streams bytes through the header parser until the envelope completes.
///
/// Returns the finished parser and whatever was read past the envelope,
/// which is the first slice of the request body.
async fn read_request_headers(
    channel: &mut MessageChannel<UnixStream>,
) -> Result<(HeaderParser, Vec<u8>), RequestError> {
    let mut parser = HeaderParser::new();
    let mut buf = [0u8; REQUEST_BUF_SIZE];
    loop {
        let n = channel
            .read(&mut buf)
            .await
            .map_err(|source| RequestError::Client {
                action: "read request header",
                source: source.into(),
            })?;
        if n == 0 {
            break;
        }
        let consumed = parser.feed(&buf[..n]);
        if !parser.accepting_input() {
            if parser.state() != ParserState::Done {
                return Err(RequestError::InvalidHeaderBlock);
            }
            return Ok((parser, buf[consumed..n].to_vec()));
        }
    }
    Err(RequestError::InvalidHeaderBlock)
}

/// Forwards the raw header block and `CONTENT_LENGTH` body bytes to the
/// backend, then half-closes its input.
///
/// The partial body read alongside the headers goes first; the rest is
/// pumped from the client in fixed-size chunks until the declared length is
/// reached or the client half-closes.
async fn forward_request(
    channel: &mut MessageChannel<UnixStream>,
    session: &mut dyn PoolSession,
    parser: &HeaderParser,
    partial_body: &[u8],
) -> Result<(), RequestError> {
    let backend = |action, source| RequestError::Backend { action, source };

    session
        .send_headers(parser.header_data())
        .await
        .map_err(|err| backend("send request headers to backend", err))?;

    let content_length = parser.content_length();
    let mut forwarded = 0u64;

    if !partial_body.is_empty() {
        let take = usize::try_from(content_length.min(partial_body.len() as u64))
            .unwrap_or(partial_body.len());
        if take > 0 {
            session
                .send_body_block(&partial_body[..take])
                .await
                .map_err(|err| backend("send request body to backend", err))?;
            forwarded = take as u64;
        }
    }

    let mut buf = [0u8; REQUEST_BUF_SIZE];
    while forwarded < content_length {
        let want = usize::try_from(content_length - forwarded)
            .unwrap_or(buf.len())
            .min(buf.len());
        let n = channel
            .read(&mut buf[..want])
            .await
            .map_err(|source| RequestError::Client {
                action: "read request body",
                source: source.into(),
            })?;
        if n == 0 {
            // Client half-closed early; forward what we got.
            break;
        }
        session
            .send_body_block(&buf[..n])
            .await
            .map_err(|err| backend("send request body to backend", err))?;
        forwarded += n as u64;
    }

    session
        .shutdown_writer()
        .await
        .map_err(|err| backend("shut down backend writer", err))
}

/// Streams the backend's response to the client, rewriting the response
/// line into HTTP/1.1 form on the way.
async fn forward_response(
    channel: &mut MessageChannel<UnixStream>,
    session: &mut dyn PoolSession,
) -> Result<(), RequestError> {
    let client = |source| RequestError::Client {
        action: "send response to client",
        source,
    };
    let backend = |source| RequestError::Backend {
        action: "read response from backend",
        source,
    };

    let mut extractor = StatusExtractor::new();
    let mut buf = [0u8; RESPONSE_BUF_SIZE];
    let mut eof = false;

    // Buffer until the response line can be synthesised, then flush the
    // buffered header region in one piece.
    while !eof {
        let n = session.stream().read(&mut buf).await.map_err(backend)?;
        if n == 0 {
            eof = true;
        } else if extractor.feed(&buf[..n]) {
            if !extractor.already_http() {
                let status_line = format!("HTTP/1.1 {}\r\n", extractor.status_line());
                channel.write_all(status_line.as_bytes()).await.map_err(client)?;
            }
            channel.write_all(extractor.buffer()).await.map_err(client)?;
            break;
        }
    }

    // Passthrough for the remainder of the response.
    while !eof {
        let n = session.stream().read(&mut buf).await.map_err(backend)?;
        if n == 0 {
            eof = true;
        } else {
            channel.write_all(&buf[..n]).await.map_err(client)?;
        }
    }
    Ok(())
}

/// Emits the HTTP 500 response for a pool spawn failure.
///
/// The body is the spawn error's pre-rendered error page when it has one,
/// the plain message otherwise.
async fn write_spawn_failure(
    channel: &mut MessageChannel<UnixStream>,
    message: &str,
    error_page: Option<&str>,
) -> Result<(), ProtocolError> {
    let body = error_page.unwrap_or(message);
    let response = format!(
        "HTTP/1.1 500 Internal Server Error\r\n\
         Status: 500 Internal Server Error\r\n\
         Connection: close\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {body}",
        body.len()
    );
    channel.write_all(response.as_bytes()).await
}

//! Backend session handles.
//!
//! A session is one leased backend: a writer for the request (headers, then
//! body, then writer shutdown) and a reader for the response. Dropping the
//! session returns the backend to the pool.

use std::fmt;
use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// One leased backend, valid for a single request.
///
/// The request side is write-ordered: headers first, then body blocks, then
/// [`shutdown_writer`](PoolSession::shutdown_writer) to signal end of input.
/// Only after the writer is shut down should the response stream be read.
#[async_trait]
pub trait PoolSession: Send {
    /// Writes the raw header block to the backend.
    async fn send_headers(&mut self, block: &[u8]) -> io::Result<()>;

    /// Writes one body chunk to the backend.
    async fn send_body_block(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Half-closes the backend's input, signalling end of the request.
    async fn shutdown_writer(&mut self) -> io::Result<()>;

    /// The backend's output stream, for reading the response.
    fn stream(&mut self) -> &mut (dyn AsyncRead + Send + Unpin);
}

impl fmt::Debug for dyn PoolSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("dyn PoolSession").finish_non_exhaustive()
    }
}

/// A [`PoolSession`] over a spawned backend's stdin and stdout.
///
/// The child is killed when the session is dropped; pool implementations
/// that cache backends wrap this type and keep the child alive themselves.
pub struct ProcessSession {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
}

impl ProcessSession {
    /// Spawns `command` with piped stdin/stdout and wraps it in a session.
    ///
    /// The backend's stderr is inherited so its diagnostics land in the
    /// server's own log stream.
    ///
    /// # Errors
    ///
    /// Returns the spawn error, or an error when the child's pipes are
    /// unavailable.
    pub fn spawn(mut command: Command) -> io::Result<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("backend stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("backend stdout unavailable"))?;

        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout,
        })
    }

    /// The OS process ID of the backend, while it is running.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn writer(&mut self) -> io::Result<&mut ChildStdin> {
        self.stdin
            .as_mut()
            .ok_or_else(|| io::Error::other("backend writer already shut down"))
    }
}

#[async_trait]
impl PoolSession for ProcessSession {
    async fn send_headers(&mut self, block: &[u8]) -> io::Result<()> {
        self.writer()?.write_all(block).await
    }

    async fn send_body_block(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer()?.write_all(chunk).await
    }

    async fn shutdown_writer(&mut self) -> io::Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.shutdown().await?;
        }
        Ok(())
    }

    fn stream(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        &mut self.stdout
    }
}

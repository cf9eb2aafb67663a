//! Test doubles and wire helpers shared by the integration tests.

#![allow(dead_code)]

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use helperd_core::pool::{ApplicationPool, PoolError, PoolOptions, PoolSession, PoolStatus};

/// Everything a scripted session recorded about one request.
#[derive(Default)]
pub struct RecordedRequest {
    pub headers: Mutex<Vec<u8>>,
    pub body: Mutex<Vec<u8>>,
    pub writer_down: AtomicBool,
}

/// A pool double that replays a canned backend response and records what
/// the server sent to the backend.
pub struct ScriptedPool {
    response: Vec<u8>,
    failure: Option<(String, Option<String>)>,
    pub leases: AtomicUsize,
    pub last_options: Mutex<Option<PoolOptions>>,
    pub request: Arc<RecordedRequest>,
}

impl ScriptedPool {
    pub fn replying(response: &[u8]) -> Self {
        Self {
            response: response.to_vec(),
            failure: None,
            leases: AtomicUsize::new(0),
            last_options: Mutex::new(None),
            request: Arc::new(RecordedRequest::default()),
        }
    }

    pub fn failing(message: &str, error_page: Option<&str>) -> Self {
        Self {
            response: Vec::new(),
            failure: Some((message.to_string(), error_page.map(str::to_string))),
            leases: AtomicUsize::new(0),
            last_options: Mutex::new(None),
            request: Arc::new(RecordedRequest::default()),
        }
    }
}

#[async_trait]
impl ApplicationPool for ScriptedPool {
    async fn get(&self, options: PoolOptions) -> Result<Box<dyn PoolSession>, PoolError> {
        self.leases.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(options);
        if let Some((message, error_page)) = &self.failure {
            return Err(PoolError::SpawnFailed {
                message: message.clone(),
                error_page: error_page.clone(),
            });
        }
        Ok(Box::new(ScriptedSession {
            request: Arc::clone(&self.request),
            response: io::Cursor::new(self.response.clone()),
        }))
    }

    fn set_max(&self, _limit: u32) {}
    fn set_max_per_app(&self, _limit: u32) {}
    fn set_max_idle_time(&self, _idle: Duration) {}

    fn status(&self) -> PoolStatus {
        PoolStatus::default()
    }
}

struct ScriptedSession {
    request: Arc<RecordedRequest>,
    response: io::Cursor<Vec<u8>>,
}

#[async_trait]
impl PoolSession for ScriptedSession {
    async fn send_headers(&mut self, block: &[u8]) -> io::Result<()> {
        self.request.headers.lock().unwrap().extend_from_slice(block);
        Ok(())
    }

    async fn send_body_block(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.request.body.lock().unwrap().extend_from_slice(chunk);
        Ok(())
    }

    async fn shutdown_writer(&mut self) -> io::Result<()> {
        self.request.writer_down.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stream(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        &mut self.response
    }
}

/// Builds the length-prefixed NUL-delimited header envelope.
pub fn envelope(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut block = Vec::new();
    for (name, value) in pairs {
        block.extend_from_slice(name.as_bytes());
        block.push(0);
        block.extend_from_slice(value.as_bytes());
        block.push(0);
    }
    let mut wire = format!("{}:", block.len()).into_bytes();
    wire.extend_from_slice(&block);
    wire.push(b',');
    wire
}

/// A document root inside a temp dir, so `DOCUMENT_ROOT/..` resolves.
pub fn document_root(dir: &tempfile::TempDir) -> PathBuf {
    let public = dir.path().join("app").join("public");
    std::fs::create_dir_all(&public).unwrap();
    public
}

/// Sends a complete front-end request and returns the full response.
pub async fn exchange(
    stream: &mut UnixStream,
    password: &[u8],
    headers: &[u8],
    body: &[u8],
) -> Vec<u8> {
    stream.write_all(password).await.unwrap();
    stream.write_all(headers).await.unwrap();
    stream.write_all(body).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    response
}

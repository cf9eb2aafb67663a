//! A minimal pool that spawns one backend per lease.
//!
//! Every `get` starts a fresh backend through the spawn-server script and
//! every drop kills it again; there is no caching and no idle eviction.
//! What it does enforce is the pool capacity: leases hold a slot, and
//! `get` blocks while all slots are taken.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::session::{PoolSession, ProcessSession};
use super::{ApplicationPool, PoolError, PoolOptions, PoolStatus};

/// Capacity used when the supervisor never configured one.
pub const DEFAULT_MAX: u32 = 6;

/// A capacity-bounded pool that spawns a backend per lease.
pub struct SpawnerPool {
    interpreter: PathBuf,
    spawn_server: PathBuf,
    max: AtomicU32,
    max_per_app: AtomicU32,
    max_idle_secs: AtomicU64,
    slots: OnceLock<Arc<Semaphore>>,
}

impl SpawnerPool {
    /// Creates a pool that runs `spawn_server` under `interpreter` to start
    /// backends.
    #[must_use]
    pub fn new(interpreter: impl Into<PathBuf>, spawn_server: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            spawn_server: spawn_server.into(),
            max: AtomicU32::new(DEFAULT_MAX),
            max_per_app: AtomicU32::new(0),
            max_idle_secs: AtomicU64::new(0),
            slots: OnceLock::new(),
        }
    }

    /// The slot semaphore, created on first use with the configured
    /// capacity. Capacity changes after this point are ignored.
    fn slots(&self) -> &Arc<Semaphore> {
        self.slots.get_or_init(|| {
            let capacity = self.max.load(Ordering::Relaxed);
            Arc::new(Semaphore::new(capacity as usize))
        })
    }

    fn command_for(&self, options: &PoolOptions) -> Command {
        let mut command = Command::new(&self.interpreter);
        command
            .arg(&self.spawn_server)
            .arg(&options.app_root)
            .arg(&options.environment)
            .arg(&options.spawn_method);
        if options.use_global_queue {
            command.arg("--global-queue");
        }
        command
    }
}

#[async_trait]
impl ApplicationPool for SpawnerPool {
    async fn get(&self, options: PoolOptions) -> Result<Box<dyn PoolSession>, PoolError> {
        let permit = Arc::clone(self.slots())
            .acquire_owned()
            .await
            .map_err(|_| PoolError::ShuttingDown)?;

        debug!(app_root = %options.app_root.display(), "spawning backend");
        let session =
            ProcessSession::spawn(self.command_for(&options)).map_err(|err| {
                PoolError::SpawnFailed {
                    message: err.to_string(),
                    error_page: None,
                }
            })?;

        Ok(Box::new(LeasedSession {
            inner: session,
            _slot: permit,
        }))
    }

    fn set_max(&self, limit: u32) {
        if self.slots.get().is_some() {
            warn!(limit, "pool capacity change after startup is ignored");
            return;
        }
        self.max.store(limit, Ordering::Relaxed);
    }

    fn set_max_per_app(&self, limit: u32) {
        self.max_per_app.store(limit, Ordering::Relaxed);
    }

    fn set_max_idle_time(&self, idle: Duration) {
        self.max_idle_secs.store(idle.as_secs(), Ordering::Relaxed);
    }

    fn status(&self) -> PoolStatus {
        let capacity = self.max.load(Ordering::Relaxed);
        let active = self.slots.get().map_or(0, |slots| {
            capacity.saturating_sub(u32::try_from(slots.available_permits()).unwrap_or(capacity))
        });
        PoolStatus {
            active,
            count: active,
            capacity,
        }
    }
}

/// A session plus the pool slot it occupies; the slot frees on drop.
struct LeasedSession {
    inner: ProcessSession,
    _slot: OwnedSemaphorePermit,
}

#[async_trait]
impl PoolSession for LeasedSession {
    async fn send_headers(&mut self, block: &[u8]) -> std::io::Result<()> {
        self.inner.send_headers(block).await
    }

    async fn send_body_block(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.inner.send_body_block(chunk).await
    }

    async fn shutdown_writer(&mut self) -> std::io::Result<()> {
        self.inner.shutdown_writer().await
    }

    fn stream(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        self.inner.stream()
    }
}

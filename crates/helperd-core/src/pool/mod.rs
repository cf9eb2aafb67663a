//! Application pool interface.
//!
//! The pool keeps warm application backends and leases them to the server
//! one request at a time. The server only depends on the traits in this
//! module; spawning, caching, and idle eviction are the pool's own affair.

pub mod error;
pub mod session;
pub mod spawner;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

pub use error::PoolError;
pub use session::{PoolSession, ProcessSession};
pub use spawner::SpawnerPool;

/// Options describing which application a request belongs to and how its
/// backend should be started. Assembled from the recognised request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Canonical application root (the parent of the public directory).
    pub app_root: PathBuf,

    /// Whether requests for this application share one global queue.
    pub use_global_queue: bool,

    /// Framework environment, passed through opaquely (e.g. `production`).
    pub environment: String,

    /// Spawn strategy, passed through opaquely.
    pub spawn_method: String,
}

impl PoolOptions {
    /// Creates options for the given application root with defaults for
    /// everything else.
    #[must_use]
    pub fn new(app_root: impl Into<PathBuf>) -> Self {
        Self {
            app_root: app_root.into(),
            use_global_queue: false,
            environment: String::new(),
            spawn_method: String::new(),
        }
    }
}

/// A point-in-time view of the pool, for the status reporter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatus {
    /// Sessions currently leased out.
    pub active: u32,
    /// Backends alive in the pool, leased or idle.
    pub count: u32,
    /// Upper bound on backends.
    pub capacity: u32,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--------- Application pool status ---------")?;
        writeln!(f, "max      = {}", self.capacity)?;
        writeln!(f, "count    = {}", self.count)?;
        writeln!(f, "active   = {}", self.active)?;
        writeln!(f, "inactive = {}", self.count.saturating_sub(self.active))
    }
}

/// A pool of application backends, shared by all workers.
///
/// Implementations synchronise internally; every method may be called from
/// any task. The three `set_*` methods are configuration applied once at
/// startup, before the first lease.
#[async_trait]
pub trait ApplicationPool: Send + Sync {
    /// Leases a backend session for the application described by `options`.
    ///
    /// May block until a slot is available.
    ///
    /// # Errors
    ///
    /// [`PoolError::SpawnFailed`] when no backend could be started for these
    /// options; other variants for internal pool failures.
    async fn get(&self, options: PoolOptions) -> Result<Box<dyn PoolSession>, PoolError>;

    /// Sets the upper bound on concurrently alive backends.
    fn set_max(&self, limit: u32);

    /// Sets the upper bound on backends per application.
    fn set_max_per_app(&self, limit: u32);

    /// Sets how long an idle backend may linger before eviction.
    fn set_max_idle_time(&self, idle: Duration);

    /// Returns a snapshot of the pool for read-only reporting.
    fn status(&self) -> PoolStatus;
}

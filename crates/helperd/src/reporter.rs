//! Read-only pool status reporting.
//!
//! A background task that renders the pool's status on an interval and
//! publishes it atomically to a file in the service temp directory, where
//! operator tooling can read it without talking to the server.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use helperd_core::pool::ApplicationPool;

/// How often the status file is refreshed.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Periodically publishes the pool status to a file.
pub struct StatusReporter {
    pool: Arc<dyn ApplicationPool>,
    path: PathBuf,
    interval: Duration,
}

impl StatusReporter {
    /// Creates a reporter for `pool` publishing to `path`.
    #[must_use]
    pub fn new(pool: Arc<dyn ApplicationPool>, path: PathBuf) -> Self {
        Self {
            pool,
            path,
            interval: REPORT_INTERVAL,
        }
    }

    /// Overrides the refresh interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Publishes until cancelled. A failed publish is logged and retried
    /// on the next tick; the reporter never disturbs request handling.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticks = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("status reporter stopped");
                    return;
                }
                _ = ticks.tick() => {
                    if let Err(err) = self.publish() {
                        warn!(path = %self.path.display(), error = %err, "cannot publish pool status");
                    }
                }
            }
        }
    }

    /// Writes the rendered status next to its destination, then renames it
    /// into place so readers never see a partial report.
    fn publish(&self) -> std::io::Result<()> {
        let status = self.pool.status();
        let parent = self
            .path
            .parent()
            .map_or_else(|| PathBuf::from("."), PathBuf::from);
        let mut staged = tempfile::NamedTempFile::new_in(parent)?;
        staged.write_all(status.to_string().as_bytes())?;
        staged.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }
}

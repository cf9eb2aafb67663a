//! Pool-specific error types.

use thiserror::Error;

/// Errors reported by an application pool when leasing a session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// No backend could be started for the requested application.
    ///
    /// Carries an optional pre-rendered error page; when present it becomes
    /// the body of the 500 response shown to the user, otherwise the message
    /// does.
    #[error("could not spawn an application backend: {message}")]
    SpawnFailed {
        /// Human-readable description of the spawn failure.
        message: String,
        /// Pre-rendered HTML error page, if the spawner produced one.
        error_page: Option<String>,
    },

    /// The pool is shutting down and no longer leases sessions.
    #[error("the application pool is shutting down")]
    ShuttingDown,

    /// An I/O error while talking to a backend.
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PoolError {
    /// Shorthand for a spawn failure with no error page.
    #[must_use]
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            message: message.into(),
            error_page: None,
        }
    }
}

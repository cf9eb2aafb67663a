//! The listening server and its worker set.
//!
//! The server owns the listening socket, the shared secret, the pool
//! handle, and a fixed set of workers created at startup and joined at
//! shutdown. Shutdown is driven by the admin channel: any byte, EOF, or an
//! interrupt signal.

use std::fmt;
use std::fs;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::sys::socket::{bind, listen, socket, AddressFamily, Backlog, SockFlag, SockType, UnixAddr};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::net::UnixListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use helperd_core::pool::ApplicationPool;
use helperd_core::paths;

use crate::config::WORKERS_PER_POOL_SLOT;
use crate::reporter::StatusReporter;
use crate::secret::SharedSecret;
use crate::worker::Worker;

/// Listen backlog for the front-end socket.
const BACKLOG: i32 = 50;

/// Socket-path mode: world rwx plus the sticky bit. Access control is the
/// shared secret, not the filesystem.
const SOCKET_MODE: u32 = 0o1777;

/// Errors that prevent the server from starting. Fatal: the process exits
/// non-zero and the supervisor decides what happens next.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StartupError {
    /// The service temp directory could not be created.
    #[error("cannot create server instance directory '{path}': {source}")]
    TempDir {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// A stale socket file from a previous instance is in the way.
    #[error("cannot remove stale socket file '{path}': {source}")]
    StaleSocket {
        /// The socket path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The socket could not be created.
    #[error("cannot create an unconnected Unix socket: {0}")]
    CreateSocket(#[source] nix::Error),

    /// The socket could not be bound to its filesystem path.
    #[error("cannot bind on Unix socket '{path}': {source}")]
    Bind {
        /// The socket path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: nix::Error,
    },

    /// The socket could not start listening.
    #[error("cannot listen on Unix socket '{path}': {source}")]
    Listen {
        /// The socket path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: nix::Error,
    },

    /// The socket path's permissions could not be set.
    #[error("cannot set permissions on '{path}': {source}")]
    Permissions {
        /// The socket path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The listener could not be registered with the runtime.
    #[error("cannot register the listening socket with the runtime: {0}")]
    Register(#[source] io::Error),

    /// A shutdown signal handler could not be installed.
    #[error("cannot install signal handler: {0}")]
    Signals(#[source] io::Error),
}

/// The helper server: listener, secret, pool handle, worker set.
pub struct Server {
    socket_path: PathBuf,
    listener: Arc<UnixListener>,
    secret: Arc<SharedSecret>,
    pool: Arc<dyn ApplicationPool>,
    worker_count: u32,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("socket_path", &self.socket_path)
            .field("worker_count", &self.worker_count)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Binds the listening socket inside `temp_dir` and prepares a worker
    /// set of `4 × max_pool_size`.
    ///
    /// The socket file is created with mode `01777`; a stale file from a
    /// previous instance is removed first.
    ///
    /// # Errors
    ///
    /// Any [`StartupError`]; bind and listen failures embed the socket
    /// path.
    pub fn bind(
        temp_dir: &Path,
        secret: SharedSecret,
        pool: Arc<dyn ApplicationPool>,
        max_pool_size: u32,
    ) -> Result<Self, StartupError> {
        paths::create_service_temp_dir(temp_dir).map_err(|source| StartupError::TempDir {
            path: temp_dir.to_path_buf(),
            source,
        })?;

        let socket_path = paths::socket_path_in(temp_dir);
        match fs::remove_file(&socket_path) {
            Ok(()) => debug!(path = %socket_path.display(), "removed stale socket file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(StartupError::StaleSocket {
                    path: socket_path,
                    source,
                })
            }
        }

        let listener = Self::listen_on(&socket_path)?;

        fs::set_permissions(&socket_path, fs::Permissions::from_mode(SOCKET_MODE)).map_err(
            |source| StartupError::Permissions {
                path: socket_path.clone(),
                source,
            },
        )?;

        Ok(Self {
            socket_path,
            listener: Arc::new(listener),
            secret: Arc::new(secret),
            pool,
            worker_count: max_pool_size * WORKERS_PER_POOL_SLOT,
        })
    }

    /// Creates, binds, and listens on the socket with an explicit backlog,
    /// then hands it to the runtime.
    fn listen_on(socket_path: &Path) -> Result<UnixListener, StartupError> {
        let fd = socket(
            AddressFamily::Unix,
            SockType::Stream,
            SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(StartupError::CreateSocket)?;

        let addr = UnixAddr::new(socket_path).map_err(|source| StartupError::Bind {
            path: socket_path.to_path_buf(),
            source,
        })?;
        bind(fd.as_raw_fd(), &addr).map_err(|source| StartupError::Bind {
            path: socket_path.to_path_buf(),
            source,
        })?;

        let backlog = Backlog::new(BACKLOG).map_err(|source| StartupError::Listen {
            path: socket_path.to_path_buf(),
            source,
        })?;
        listen(&fd, backlog).map_err(|source| StartupError::Listen {
            path: socket_path.to_path_buf(),
            source,
        })?;

        let listener = std::os::unix::net::UnixListener::from(fd);
        listener
            .set_nonblocking(true)
            .map_err(StartupError::Register)?;
        UnixListener::from_std(listener).map_err(StartupError::Register)
    }

    /// The filesystem path the server is listening on.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Runs the server until the admin channel or a signal orders
    /// shutdown.
    ///
    /// Spawns the worker set and the status reporter, then blocks on the
    /// admin channel. On shutdown every worker is interrupted and joined,
    /// the listener is closed, and the socket file removed.
    ///
    /// # Errors
    ///
    /// [`StartupError::Signals`] when the interrupt handlers cannot be
    /// installed.
    pub async fn run(self, mut admin_channel: pipe::Receiver) -> Result<(), StartupError> {
        let shutdown = CancellationToken::new();
        let mut workers = JoinSet::new();
        for number in 1..=self.worker_count {
            workers.spawn(
                Worker::new(
                    number,
                    Arc::clone(&self.listener),
                    Arc::clone(&self.secret),
                    Arc::clone(&self.pool),
                    shutdown.child_token(),
                )
                .run(),
            );
        }
        info!(workers = self.worker_count, path = %self.socket_path.display(), "helper server listening");

        let reporter = StatusReporter::new(
            Arc::clone(&self.pool),
            self.socket_path
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("status.txt"),
        );
        let reporter_task = tokio::spawn(reporter.run(shutdown.child_token()));

        let mut sigterm = signal(SignalKind::terminate()).map_err(StartupError::Signals)?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(StartupError::Signals)?;

        let mut admin_buf = [0u8; 1];
        loop {
            tokio::select! {
                read = admin_channel.read(&mut admin_buf) => {
                    match read {
                        Ok(0) => info!("admin channel closed, shutting down"),
                        Ok(_) => info!("shutdown requested over the admin channel"),
                        Err(err) => error!(error = %err, "admin channel failed, shutting down"),
                    }
                    break;
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    break;
                }
                _ = sigint.recv() => {
                    info!("received SIGINT, shutting down");
                    break;
                }
                Some(exited) = workers.join_next() => {
                    // Workers only return when interrupted; anything earlier
                    // is a bug in the request-handling core.
                    match exited {
                        Err(err) if err.is_panic() => {
                            error!(error = %err, "worker panicked; aborting");
                            std::process::abort();
                        }
                        _ => error!("worker exited prematurely"),
                    }
                }
            }
        }

        debug!("interrupting workers");
        shutdown.cancel();
        while let Some(exited) = workers.join_next().await {
            if let Err(err) = exited {
                if err.is_panic() {
                    error!(error = %err, "worker panicked during shutdown; aborting");
                    std::process::abort();
                }
            }
        }
        let _ = reporter_task.await;

        drop(self.listener);
        if let Err(err) = fs::remove_file(&self.socket_path) {
            if err.kind() != io::ErrorKind::NotFound {
                debug!(error = %err, "could not remove socket file");
            }
        }
        drop(admin_channel);
        info!("helper server shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helperd_core::pool::{PoolError, PoolOptions, PoolSession, PoolStatus};

    struct NullPool;

    #[async_trait::async_trait]
    impl ApplicationPool for NullPool {
        async fn get(
            &self,
            _options: PoolOptions,
        ) -> Result<Box<dyn PoolSession>, PoolError> {
            Err(PoolError::spawn_failed("no backends in this pool"))
        }

        fn set_max(&self, _limit: u32) {}
        fn set_max_per_app(&self, _limit: u32) {}
        fn set_max_idle_time(&self, _idle: std::time::Duration) {}

        fn status(&self) -> PoolStatus {
            PoolStatus::default()
        }
    }

    #[tokio::test]
    async fn bind_creates_a_sticky_world_rwx_socket() {
        let dir = tempfile::tempdir().unwrap();
        let server = Server::bind(
            dir.path(),
            SharedSecret::new([0u8; 64]),
            Arc::new(NullPool),
            1,
        )
        .unwrap();

        let mode = fs::metadata(server.socket_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o7777, 0o1777);
    }

    #[tokio::test]
    async fn bind_replaces_a_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let stale = paths::socket_path_in(dir.path());
        fs::write(&stale, b"stale").unwrap();

        let server = Server::bind(
            dir.path(),
            SharedSecret::new([0u8; 64]),
            Arc::new(NullPool),
            1,
        )
        .unwrap();
        assert_eq!(server.socket_path(), stale);
    }

    #[tokio::test]
    async fn bind_error_embeds_the_socket_path() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the socket file should go makes bind fail.
        let occupied = paths::socket_path_in(dir.path());
        fs::create_dir(&occupied).unwrap();

        let err = Server::bind(
            dir.path(),
            SharedSecret::new([0u8; 64]),
            Arc::new(NullPool),
            1,
        )
        .unwrap_err();
        assert!(err.to_string().contains("helper_server.sock"));
    }
}

//! Service directory and path helpers.
//!
//! The helper server and the front-end never exchange the socket location at
//! runtime; both sides compute the same path from the same inputs. The
//! supervisor exports `HELPERD_TMPDIR` to both processes, and in its absence
//! the path is derived from the system temp dir and the supervisor's PID.

use std::env;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::unistd;
use thiserror::Error;

/// Environment variable overriding the service temp directory.
pub const TEMP_DIR_ENV: &str = "HELPERD_TMPDIR";

/// File name of the listening socket inside the service temp directory.
pub const SOCKET_FILE_NAME: &str = "helper_server.sock";

/// A path could not be resolved to a canonical application root.
#[derive(Debug, Error)]
#[error("cannot resolve the path '{path}': {source}")]
pub struct PathResolveError {
    /// The path that failed to resolve.
    pub path: PathBuf,
    /// The underlying filesystem error.
    #[source]
    pub source: io::Error,
}

/// Returns the system temp directory: `$TMPDIR` if set and non-empty,
/// `/tmp` otherwise.
#[must_use]
pub fn system_temp_dir() -> PathBuf {
    match env::var_os("TMPDIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from("/tmp"),
    }
}

/// Returns the per-instance service temp directory.
///
/// Honours [`TEMP_DIR_ENV`] when the supervisor set it; otherwise
/// `<system temp dir>/helperd.<ppid>`, keyed on the parent so that the
/// front-end, started by the same supervisor, computes an identical path.
#[must_use]
pub fn service_temp_dir() -> PathBuf {
    match env::var_os(TEMP_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => system_temp_dir().join(format!("helperd.{}", unistd::getppid())),
    }
}

/// Returns the listening socket path inside `dir`.
#[must_use]
pub fn socket_path_in(dir: &Path) -> PathBuf {
    dir.join(SOCKET_FILE_NAME)
}

/// Creates the service temp directory with mode `0777`.
///
/// Both the server and the front-end user must be able to traverse it;
/// access to the socket itself is gated by the shared secret.
///
/// # Errors
///
/// Returns the error from directory creation or the permission change.
pub fn create_service_temp_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o777))
}

/// Resolves `DOCUMENT_ROOT/..` to the canonical application root.
///
/// Symlinks are resolved and the result is absolute. The application root
/// is the directory containing the public directory the front-end serves.
///
/// # Errors
///
/// Returns a [`PathResolveError`] carrying the offending path when the
/// directory does not exist or cannot be traversed.
pub fn canonicalize_app_root(document_root: &Path) -> Result<PathBuf, PathResolveError> {
    let parent = document_root.join("..");
    fs::canonicalize(&parent).map_err(|source| PathResolveError {
        path: parent,
        source,
    })
}

//! Owned file descriptor handles.
//!
//! Descriptors cross API boundaries in the helper server: the admin pipe is
//! inherited from the supervisor as a bare integer, and the listening socket
//! is produced by raw socket calls before the runtime takes it over. This
//! module wraps such descriptors in a handle that closes exactly once and
//! surfaces a failed `close`, so a supervisor can observe descriptor leaks
//! under test.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::unistd;
use tracing::error;

/// A uniquely owned OS file descriptor.
///
/// Dropping the handle closes the descriptor; a failed close is logged at
/// ERROR level. Call [`close`](OwnedDescriptor::close) instead when the
/// caller needs to act on the error. Consuming conversions hand the
/// descriptor to whatever owns it next without an intermediate close.
#[derive(Debug)]
pub struct OwnedDescriptor {
    fd: Option<OwnedFd>,
}

impl OwnedDescriptor {
    /// Takes ownership of a raw descriptor.
    ///
    /// # Safety
    ///
    /// `fd` must be an open descriptor that nothing else will close.
    #[must_use]
    pub unsafe fn from_raw(fd: RawFd) -> Self {
        Self {
            fd: Some(unsafe { OwnedFd::from_raw_fd(fd) }),
        }
    }

    /// Returns the raw descriptor without giving up ownership.
    #[must_use]
    pub fn as_raw(&self) -> RawFd {
        match &self.fd {
            Some(fd) => fd.as_raw_fd(),
            None => unreachable!("descriptor already consumed"),
        }
    }

    /// Closes the descriptor now, reporting the result.
    ///
    /// # Errors
    ///
    /// Returns the error from the underlying `close` call.
    pub fn close(mut self) -> io::Result<()> {
        match self.fd.take() {
            Some(fd) => unistd::close(fd.into_raw_fd()).map_err(io::Error::from),
            None => Ok(()),
        }
    }

    /// Converts into a standard [`OwnedFd`], transferring ownership.
    #[must_use]
    pub fn into_owned_fd(mut self) -> OwnedFd {
        match self.fd.take() {
            Some(fd) => fd,
            None => unreachable!("descriptor already consumed"),
        }
    }
}

impl From<OwnedFd> for OwnedDescriptor {
    fn from(fd: OwnedFd) -> Self {
        Self { fd: Some(fd) }
    }
}

impl Drop for OwnedDescriptor {
    fn drop(&mut self) {
        if let Some(fd) = self.fd.take() {
            let raw = fd.into_raw_fd();
            if let Err(err) = unistd::close(raw) {
                error!(fd = raw, error = %err, "cannot close file descriptor");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe_fds() -> (OwnedFd, OwnedFd) {
        unistd::pipe().expect("pipe")
    }

    #[test]
    fn drop_closes_exactly_once() {
        let (read_end, write_end) = pipe_fds();
        let raw = write_end.as_raw_fd();
        drop(OwnedDescriptor::from(write_end));

        // The descriptor is gone: a second close must fail with EBADF.
        assert_eq!(unistd::close(raw), Err(nix::errno::Errno::EBADF));
        drop(read_end);
    }

    #[test]
    fn explicit_close_consumes_the_handle() {
        let (read_end, write_end) = pipe_fds();
        let handle = OwnedDescriptor::from(write_end);
        handle.close().expect("close");
        drop(read_end);
    }

    #[test]
    fn from_raw_takes_ownership() {
        let (read_end, write_end) = pipe_fds();
        let raw = write_end.into_raw_fd();
        let handle = unsafe { OwnedDescriptor::from_raw(raw) };
        assert_eq!(handle.as_raw(), raw);
        drop(handle);
        assert_eq!(unistd::close(raw), Err(nix::errno::Errno::EBADF));
        drop(read_end);
    }
}

//! The shared connection secret.
//!
//! The listening socket is world-connectable; what keeps strangers out is a
//! fixed-width secret delivered over the admin pipe and replayed by the
//! front-end as the first bytes of every connection. The secret must never
//! appear in logs, error messages, or response bodies.

use std::fmt;
use std::io;

use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Exact width of the shared secret, in bytes.
pub const SECRET_SIZE: usize = 64;

/// The 64-byte shared secret, immutable for the process lifetime.
///
/// `Debug` and `Display` are deliberately opaque.
#[derive(Clone)]
pub struct SharedSecret {
    bytes: [u8; SECRET_SIZE],
}

impl SharedSecret {
    /// Wraps an already-obtained secret.
    #[must_use]
    pub const fn new(bytes: [u8; SECRET_SIZE]) -> Self {
        Self { bytes }
    }

    /// Reads the secret from the admin channel: exactly [`SECRET_SIZE`]
    /// bytes, delivered before anything else.
    ///
    /// # Errors
    ///
    /// Returns the read error; a pipe closed before the full width arrives
    /// surfaces as `UnexpectedEof`.
    pub async fn receive<R>(channel: &mut R) -> io::Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut bytes = [0u8; SECRET_SIZE];
        channel.read_exact(&mut bytes).await?;
        Ok(Self { bytes })
    }

    /// Whether `presented` matches the secret, byte-exactly.
    ///
    /// The comparison is constant-time over the full width; it does not
    /// exit early on the first mismatching byte.
    #[must_use]
    pub fn matches(&self, presented: &[u8]) -> bool {
        presented.len() == SECRET_SIZE && bool::from(presented.ct_eq(&self.bytes))
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

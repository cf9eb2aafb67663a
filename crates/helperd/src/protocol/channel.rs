//! Framed I/O over a bidirectional byte stream.
//!
//! A thin wrapper used for the password exchange and response emission:
//! fixed-width reads that distinguish a clean close from a truncated one,
//! writes that either complete or report the I/O error, and the
//! length-prefixed envelope writer the front-end side of the protocol uses.
//! A broken pipe surfaces as a failed write, never as process death
//! (`SIGPIPE` is ignored globally at startup).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::ProtocolError;

/// Framed reads and writes over one stream.
#[derive(Debug)]
pub struct MessageChannel<S> {
    stream: S,
}

impl<S> MessageChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a stream.
    pub const fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Reads exactly `buf.len()` bytes.
    ///
    /// Returns `Ok(true)` when the buffer was filled and `Ok(false)` when
    /// the peer closed the stream before sending anything.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::ShortRead`] when the stream ends partway through,
    /// or the underlying I/O error.
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<bool, ProtocolError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(ProtocolError::ShortRead {
                    wanted: buf.len(),
                    got: filled,
                });
            }
            filled += n;
        }
        Ok(true)
    }

    /// Reads whatever is available, up to `buf.len()` bytes. Zero means
    /// end-of-stream.
    ///
    /// # Errors
    ///
    /// The underlying I/O error.
    pub async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf).await
    }

    /// Writes the whole buffer.
    ///
    /// # Errors
    ///
    /// The underlying I/O error (including a broken pipe when the peer
    /// disconnected mid-response).
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), ProtocolError> {
        self.stream.write_all(buf).await?;
        Ok(())
    }

    /// Writes `payload` in the length-prefixed envelope: ASCII decimal
    /// length, `:`, the payload, `,`.
    ///
    /// # Errors
    ///
    /// The underlying I/O error.
    pub async fn write_len_prefixed(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        let prefix = format!("{}:", payload.len());
        self.stream.write_all(prefix.as_bytes()).await?;
        self.stream.write_all(payload).await?;
        self.stream.write_all(b",").await?;
        Ok(())
    }

    /// Hands back the wrapped stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn read_exact_reassembles_partial_reads() {
        let (client, server) = duplex(4);
        let mut server = MessageChannel::new(server);

        let writer = tokio::spawn(async move {
            let mut client = MessageChannel::new(client);
            client.write_all(b"0123456789").await.unwrap();
            client.into_inner()
        });

        let mut buf = [0u8; 10];
        assert!(server.read_exact(&mut buf).await.unwrap());
        assert_eq!(&buf, b"0123456789");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn clean_close_before_any_byte_is_not_an_error() {
        let (client, server) = duplex(16);
        drop(client);

        let mut server = MessageChannel::new(server);
        let mut buf = [0u8; 4];
        assert!(!server.read_exact(&mut buf).await.unwrap());
    }

    #[tokio::test]
    async fn truncation_mid_read_is_a_short_read() {
        let (client, server) = duplex(16);
        let mut client = MessageChannel::new(client);
        client.write_all(b"ab").await.unwrap();
        drop(client);

        let mut server = MessageChannel::new(server);
        let mut buf = [0u8; 4];
        let err = server.read_exact(&mut buf).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ShortRead { wanted: 4, got: 2 }
        ));
    }

    #[tokio::test]
    async fn len_prefixed_envelope_layout() {
        let (client, server) = duplex(64);
        let mut client = MessageChannel::new(client);
        client.write_len_prefixed(b"A\0b\0").await.unwrap();
        drop(client);

        let mut server = MessageChannel::new(server);
        let mut wire = Vec::new();
        let mut buf = [0u8; 16];
        loop {
            let n = server.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            wire.extend_from_slice(&buf[..n]);
        }
        assert_eq!(wire, b"4:A\0b\0,");
    }
}

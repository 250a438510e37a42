//! Raw byte transport to the adb daemon.
//!
//! [`AdbConnection`] wraps a stream with an explicit lifecycle:
//!
//! ```text
//! Unconnected --connect--> Connected --close--> Closed
//! ```
//!
//! Reads and writes are only legal while connected. `close` is idempotent
//! and may be called from any state.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::config::AdbEndpoint;
use crate::error::{Error, Result};

/// Observable lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    Closed,
}

#[derive(Debug)]
enum Inner<S> {
    Unconnected,
    Connected(S),
    Closed,
}

/// A byte stream to the adb daemon
#[derive(Debug)]
pub struct AdbConnection<S = TcpStream> {
    inner: Inner<S>,
}

impl AdbConnection<TcpStream> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Inner::Unconnected,
        }
    }

    /// Open a TCP connection to the daemon.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` unless the connection is unconnected, and
    /// `Error::Connection` if the daemon is unreachable.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        match self.inner {
            Inner::Unconnected => {}
            Inner::Connected(_) => return Err(Error::InvalidState("already connected")),
            Inner::Closed => return Err(Error::InvalidState("connection already closed")),
        }

        let stream = TcpStream::connect((host, port)).await?;
        // Relayed stdio is interactive; don't let Nagle hold back small frames
        stream.set_nodelay(true)?;

        debug!("Connected to adb daemon at {}:{}", host, port);
        self.inner = Inner::Connected(stream);
        Ok(())
    }

    /// Create a connection and connect it to `endpoint` in one step.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` if the daemon is unreachable.
    pub async fn open(endpoint: &AdbEndpoint) -> Result<Self> {
        let mut conn = Self::new();
        conn.connect(&endpoint.host, endpoint.port).await?;
        Ok(conn)
    }
}

impl Default for AdbConnection<TcpStream> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> AdbConnection<S> {
    /// Wrap an already-connected stream.
    pub fn from_stream(stream: S) -> Self {
        Self {
            inner: Inner::Connected(stream),
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.inner {
            Inner::Unconnected => ConnectionState::Unconnected,
            Inner::Connected(_) => ConnectionState::Connected,
            Inner::Closed => ConnectionState::Closed,
        }
    }

    fn stream_mut(&mut self) -> Result<&mut S> {
        match &mut self.inner {
            Inner::Connected(stream) => Ok(stream),
            Inner::Unconnected => Err(Error::InvalidState("not connected")),
            Inner::Closed => Err(Error::InvalidState("connection closed")),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> AdbConnection<S> {
    /// Read exactly `n` bytes.
    ///
    /// `context` names what is being read and ends up in the error if the
    /// peer closes the stream early.
    ///
    /// # Errors
    ///
    /// Returns `Error::TruncatedStream` if the stream ends before `n` bytes
    /// arrive, `Error::Connection` on any other I/O failure.
    pub async fn read_exact(&mut self, n: usize, context: &'static str) -> Result<Vec<u8>> {
        let stream = self.stream_mut()?;
        let mut buf = vec![0u8; n];

        match stream.read_exact(&mut buf).await {
            Ok(_) => {
                trace!("Read {} bytes ({})", n, context);
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::TruncatedStream {
                expected: n,
                context,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Write all of `bytes` and flush.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` on any I/O failure.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let stream = self.stream_mut()?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        trace!("Wrote {} bytes", bytes.len());
        Ok(())
    }

    /// Release the underlying stream. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Inner::Connected(mut stream) = std::mem::replace(&mut self.inner, Inner::Closed) {
            if let Err(e) = stream.shutdown().await {
                debug!("Error shutting down adb connection: {}", e);
            }
            debug!("Closed adb connection");
        }
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "adb connection is not open")
}

impl<S: AsyncRead + Unpin> AsyncRead for AdbConnection<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            Inner::Connected(stream) => Pin::new(stream).poll_read(cx, buf),
            _ => Poll::Ready(Err(not_connected())),
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for AdbConnection<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().inner {
            Inner::Connected(stream) => Pin::new(stream).poll_write(cx, buf),
            _ => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            Inner::Connected(stream) => Pin::new(stream).poll_flush(cx),
            _ => Poll::Ready(Err(not_connected())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().inner {
            Inner::Connected(stream) => Pin::new(stream).poll_shutdown(cx),
            _ => Poll::Ready(Ok(())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockStream;

    #[tokio::test]
    async fn test_read_exact_returns_requested_bytes() {
        let mut conn = AdbConnection::from_stream(MockStream::new(b"OKAYrest"));

        assert_eq!(conn.read_exact(4, "status").await.unwrap(), b"OKAY");
        assert_eq!(conn.read_exact(4, "rest").await.unwrap(), b"rest");
    }

    #[tokio::test]
    async fn test_read_exact_short_stream_is_truncated() {
        let mut conn = AdbConnection::from_stream(MockStream::new(b"OK"));

        let err = conn.read_exact(4, "status").await.unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedStream {
                expected: 4,
                context: "status"
            }
        ));
    }

    #[tokio::test]
    async fn test_write_all_reaches_stream() {
        let mut conn = AdbConnection::from_stream(MockStream::new(b""));
        conn.write_all(b"DUMP").await.unwrap();
        conn.write_all(&[0, 0, 0, 1]).await.unwrap();

        let Inner::Connected(stream) = &conn.inner else {
            panic!("Expected connected state");
        };
        assert_eq!(stream.written(), b"DUMP\0\0\0\x01");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut conn = AdbConnection::from_stream(MockStream::new(b""));
        assert_eq!(conn.state(), ConnectionState::Connected);

        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);

        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_io_after_close_is_invalid_state() {
        let mut conn = AdbConnection::from_stream(MockStream::new(b"OKAY"));
        conn.close().await;

        assert!(matches!(
            conn.read_exact(4, "status").await,
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            conn.write_all(b"x").await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_io_before_connect_is_invalid_state() {
        let mut conn = AdbConnection::new();
        assert_eq!(conn.state(), ConnectionState::Unconnected);

        assert!(matches!(
            conn.write_all(b"x").await,
            Err(Error::InvalidState(_))
        ));
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_connect_after_close_is_rejected() {
        let mut conn = AdbConnection::new();
        conn.close().await;

        let err = conn.connect("127.0.0.1", 5037).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Bind then drop a listener so the port is very likely closed
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut conn = AdbConnection::new();
        let err = conn.connect("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(conn.state(), ConnectionState::Unconnected);
    }
}

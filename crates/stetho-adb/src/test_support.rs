//! In-memory stand-ins for the adb daemon used by unit tests.

use std::io::{self, Cursor};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A duplex stream with a scripted read side and a captured write side.
#[derive(Debug)]
pub struct MockStream {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
    fail_when_drained: bool,
}

impl MockStream {
    pub fn new(input: &[u8]) -> Self {
        Self {
            input: Cursor::new(input.to_vec()),
            output: Vec::new(),
            fail_when_drained: false,
        }
    }

    /// Error instead of reporting end-of-stream once the script is consumed,
    /// so tests can assert nothing reads past a given point.
    pub fn fail_when_drained(mut self) -> Self {
        self.fail_when_drained = true;
        self
    }

    pub fn written(&self) -> &[u8] {
        &self.output
    }

    #[allow(clippy::cast_possible_truncation)] // Test scripts are small
    fn drained(&self) -> bool {
        self.input.position() as usize >= self.input.get_ref().len()
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.fail_when_drained && this.drained() {
            return Poll::Ready(Err(io::Error::other("read past end of script")));
        }
        Pin::new(&mut this.input).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().output).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().output).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().output).poll_shutdown(cx)
    }
}

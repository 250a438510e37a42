//! Stetho dumpapp protocol.
//!
//! Once a connection is forwarded to the app's stetho socket, the client
//! greets it, sends the command line, then serves frames until the app
//! reports an exit status.
//!
//! Every frame is a one byte code followed by a big-endian signed 32-bit
//! value:
//!
//! ```text
//! client -> app   "DUMP" | i32 version
//!                 '!'    | i32 argc | (u16 len | UTF-8 bytes) * argc
//!                 '-'    | i32 count | bytes      (stdin data)
//!                 '-'    | i32 -1                 (stdin closed)
//!
//! app -> client   '1'    | i32 len | bytes        (stdout)
//!                 '2'    | i32 len | bytes        (stderr)
//!                 '_'    | i32 len                (stdin request)
//!                 'x'    | i32 status             (exit)
//! ```
//!
//! The absolute value of the incoming i32 is always used.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::framing::{self, Width};
use crate::transport::AdbConnection;

pub const HELLO_MAGIC: &[u8; 4] = b"DUMP";
pub const PROTOCOL_VERSION: i32 = 1;

const CODE_STDOUT: u8 = b'1';
const CODE_STDERR: u8 = b'2';
const CODE_STDIN_REQUEST: u8 = b'_';
const CODE_EXIT: u8 = b'x';
const CODE_ENTER: u8 = b'!';
const CODE_STDIN_REPLY: u8 = b'-';

/// Code byte plus i32
const HEADER_SIZE: usize = 5;

/// Largest single read from local stdin
const MAX_STDIN_CHUNK: usize = 64 * 1024;

/// Frames sent by the app
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpappFrame {
    Stdout(Bytes),
    Stderr(Bytes),
    /// The app wants up to this many bytes of stdin
    StdinRequest(usize),
    Exit(i32),
}

/// Frames sent to the app
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Hello,
    Command(Vec<String>),
    Stdin(Bytes),
    StdinClosed,
}

/// Codec for dumpapp frames
#[derive(Debug, Default)]
pub struct DumpappCodec {
    /// Code and length of a stdout/stderr frame whose payload hasn't arrived
    pending: Option<(u8, usize)>,
}

impl DumpappCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for DumpappCodec {
    type Item = DumpappFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let (code, len) = match self.pending {
            Some(pending) => pending,
            None => {
                if src.len() < HEADER_SIZE {
                    return Ok(None);
                }

                let code = src.get_u8();
                // Four byte fields always fit in i32
                #[allow(clippy::cast_possible_truncation)]
                let value = framing::unpack(Width::Four, &src[..4]) as i32;
                src.advance(4);

                trace!("Frame code={:?} value={}", char::from(code), value);

                match code {
                    CODE_STDOUT | CODE_STDERR => (code, value.unsigned_abs() as usize),
                    CODE_STDIN_REQUEST => {
                        return Ok(Some(DumpappFrame::StdinRequest(
                            value.unsigned_abs() as usize
                        )));
                    }
                    CODE_EXIT => return Ok(Some(DumpappFrame::Exit(value.wrapping_abs()))),
                    other => {
                        return Err(Error::protocol(format!(
                            "Unexpected header: {:?}",
                            char::from(other)
                        )));
                    }
                }
            }
        };

        if src.len() < len {
            self.pending = Some((code, len));
            src.reserve(len - src.len());
            return Ok(None);
        }

        self.pending = None;
        let payload = src.split_to(len).freeze();

        Ok(Some(if code == CODE_STDOUT {
            DumpappFrame::Stdout(payload)
        } else {
            DumpappFrame::Stderr(payload)
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        match self.pending {
            Some((code, len)) => Err(Error::TruncatedStream {
                expected: len,
                context: if code == CODE_STDOUT {
                    "stdout blob"
                } else {
                    "stderr blob"
                },
            }),
            None if src.is_empty() => Ok(None),
            None => Err(Error::TruncatedStream {
                expected: HEADER_SIZE - 1,
                context: "int4",
            }),
        }
    }
}

impl Encoder<ClientFrame> for DumpappCodec {
    type Error = Error;

    fn encode(&mut self, item: ClientFrame, dst: &mut BytesMut) -> Result<()> {
        match item {
            ClientFrame::Hello => {
                dst.reserve(8);
                dst.put_slice(HELLO_MAGIC);
                framing::put(dst, Width::Four, i64::from(PROTOCOL_VERSION));
            }
            ClientFrame::Command(args) => {
                let argc = i32::try_from(args.len()).map_err(|_| {
                    Error::InvalidArgument(format!("Too many arguments: {}", args.len()))
                })?;

                dst.put_u8(CODE_ENTER);
                framing::put(dst, Width::Four, i64::from(argc));
                for arg in &args {
                    let len = u16::try_from(arg.len()).map_err(|_| {
                        Error::InvalidArgument(format!(
                            "Argument is {} bytes, at most {} can be sent",
                            arg.len(),
                            u16::MAX
                        ))
                    })?;
                    framing::put(dst, Width::Two, i64::from(len));
                    dst.put_slice(arg.as_bytes());
                }
            }
            ClientFrame::Stdin(data) => {
                let count = i32::try_from(data.len())
                    .map_err(|_| Error::protocol("stdin chunk too large"))?;

                dst.reserve(HEADER_SIZE + data.len());
                dst.put_u8(CODE_STDIN_REPLY);
                framing::put(dst, Width::Four, i64::from(count));
                dst.put_slice(&data);
            }
            ClientFrame::StdinClosed => {
                dst.put_u8(CODE_STDIN_REPLY);
                framing::put(dst, Width::Four, -1);
            }
        }
        Ok(())
    }
}

/// A dumpapp conversation over a connection already forwarded to the app
pub struct DumpappSession<S> {
    framed: Framed<AdbConnection<S>, DumpappCodec>,
}

impl<S> std::fmt::Debug for DumpappSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpappSession").finish_non_exhaustive()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> DumpappSession<S> {
    pub fn new(conn: AdbConnection<S>) -> Self {
        Self {
            framed: Framed::new(conn, DumpappCodec::new()),
        }
    }

    /// Send the protocol greeting.
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` if the write fails.
    pub async fn hello(&mut self) -> Result<()> {
        debug!("Sending dumpapp hello (version {})", PROTOCOL_VERSION);
        self.framed.send(ClientFrame::Hello).await
    }

    /// Send the command line to run inside the app.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidArgument` if an argument is too long to frame.
    pub async fn send_command(&mut self, args: &[String]) -> Result<()> {
        debug!("Sending dumpapp command {:?}", args);
        self.framed.send(ClientFrame::Command(args.to_vec())).await
    }

    /// Serve the app's frames until it exits, returning its exit status.
    ///
    /// Output is flushed after every frame. Stdin is only read when the app
    /// asks for it.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProtocolViolation` for an unknown frame code,
    /// `Error::TruncatedStream` if the app disconnects without exiting, and
    /// `Error::LocalIo` if local stdio fails.
    pub async fn relay<I, O, E>(
        &mut self,
        stdin: &mut I,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<i32>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        loop {
            let frame = match self.framed.next().await {
                Some(frame) => frame?,
                None => {
                    return Err(Error::TruncatedStream {
                        expected: 1,
                        context: "code",
                    });
                }
            };

            match frame {
                DumpappFrame::Stdout(data) => write_flushed(stdout, &data).await?,
                DumpappFrame::Stderr(data) => write_flushed(stderr, &data).await?,
                DumpappFrame::StdinRequest(0) => {}
                DumpappFrame::StdinRequest(len) => {
                    let reply = read_stdin(stdin, len).await?;
                    self.framed.send(reply).await?;
                }
                DumpappFrame::Exit(code) => {
                    debug!("Remote command exited with status {}", code);
                    return Ok(code);
                }
            }
        }
    }

    /// Greet the app, run `args`, and relay stdio until it exits.
    ///
    /// # Errors
    ///
    /// See [`DumpappSession::relay`].
    pub async fn run<I, O, E>(
        mut self,
        args: &[String],
        stdin: &mut I,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<i32>
    where
        I: AsyncRead + Unpin,
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        self.hello().await?;
        self.send_command(args).await?;
        let result = self.relay(stdin, stdout, stderr).await;
        self.close().await;
        result
    }

    pub async fn close(self) {
        let mut conn = self.framed.into_inner();
        conn.close().await;
    }
}

async fn write_flushed<W: AsyncWrite + Unpin>(out: &mut W, data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    out.write_all(data).await.map_err(Error::LocalIo)?;
    out.flush().await.map_err(Error::LocalIo)
}

async fn read_stdin<R: AsyncRead + Unpin>(stdin: &mut R, len: usize) -> Result<ClientFrame> {
    let mut buf = vec![0u8; len.min(MAX_STDIN_CHUNK)];
    let read = stdin.read(&mut buf).await.map_err(Error::LocalIo)?;

    if read == 0 {
        trace!("Stdin closed");
        return Ok(ClientFrame::StdinClosed);
    }

    buf.truncate(read);
    trace!("Forwarding {} bytes of stdin", read);
    Ok(ClientFrame::Stdin(Bytes::from(buf)))
}

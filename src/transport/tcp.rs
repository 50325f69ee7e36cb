//! TCP transport implementation.
//!
//! Frames are length-prefixed:
//!
//! ```text
//! ┌──────────────┬───────────────┬────────────┬─────────────┐
//! │ u32 body_len │ u16 type_len  │ type (utf8)│ payload     │
//! └──────────────┴───────────────┴────────────┴─────────────┘
//!                 \________________ body_len ______________/
//! ```
//!
//! Header and length errors desynchronize the stream and are reported as
//! transient connection errors. A frame that is read completely but has a
//! non-UTF-8 type tag is skipped and reported as unclassified.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

use super::{Connection, Transport, TransportError, TransportResult};
use crate::protocol::Message;

/// Largest frame body accepted or produced (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// TCP transport with length-prefixed framing.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// Upper bound on connection establishment.
    connect_timeout: Duration,
    /// Largest frame body accepted or produced.
    max_frame_len: usize,
}

impl TcpTransport {
    /// Create a new TCP transport.
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Set the maximum frame body size.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Transport for TcpTransport {
    fn connect<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, TransportResult<Box<dyn Connection>>> {
        Box::pin(async move {
            let target = socket_address(address);
            tracing::debug!("TCP connecting to {}", target);

            let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(target))
                .await
                .map_err(|_| {
                    TransportError::connection(format!(
                        "connect to {target} timed out after {:?}",
                        self.connect_timeout
                    ))
                })?
                .map_err(|e| TransportError::connection(format!("connect to {target}: {e}")))?;

            let conn = TcpConnection::new(stream).with_max_frame_len(self.max_frame_len);
            Ok(Box::new(conn) as Box<dyn Connection>)
        })
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}

/// Strip an optional `scheme://` prefix and any trailing path.
fn socket_address(address: &str) -> &str {
    let rest = address
        .split_once("://")
        .map_or(address, |(_, rest)| rest);
    rest.split('/').next().unwrap_or(rest)
}

/// One framed TCP link. Reads and writes lock independent halves.
pub struct TcpConnection {
    peer: Option<SocketAddr>,
    reader: Mutex<BufReader<OwnedReadHalf>>,
    writer: Mutex<OwnedWriteHalf>,
    closed: watch::Sender<bool>,
    max_frame_len: usize,
}

impl TcpConnection {
    /// Wrap an established stream.
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        // Nagle only delays small control frames.
        let _ = stream.set_nodelay(true);
        let (read, write) = stream.into_split();
        let (closed, _) = watch::channel(false);

        Self {
            peer,
            reader: Mutex::new(BufReader::new(read)),
            writer: Mutex::new(write),
            closed,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Set the maximum frame body size.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Remote address, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn closed_locally() -> TransportError {
        TransportError::closed("connection closed locally")
    }
}

impl Connection for TcpConnection {
    fn send(&self, message: Message) -> BoxFuture<'_, TransportResult<()>> {
        Box::pin(async move {
            let frame = encode_frame(&message, self.max_frame_len)?;

            let mut closed = self.closed.subscribe();
            if *closed.borrow_and_update() {
                return Err(Self::closed_locally());
            }

            let mut writer = self.writer.lock().await;
            tokio::select! {
                _ = closed.wait_for(|c| *c) => Err(Self::closed_locally()),
                res = writer.write_all(&frame) => res.map_err(TransportError::from),
            }
        })
    }

    fn receive(&self) -> BoxFuture<'_, TransportResult<Message>> {
        Box::pin(async move {
            let mut closed = self.closed.subscribe();
            if *closed.borrow_and_update() {
                return Err(Self::closed_locally());
            }

            let mut reader = self.reader.lock().await;
            tokio::select! {
                _ = closed.wait_for(|c| *c) => Err(Self::closed_locally()),
                frame = read_frame(&mut *reader, self.max_frame_len) => frame,
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.send_replace(true) {
                return;
            }
            // Pending sends observe the flag and drop the writer lock.
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("TCP shutdown error: {}", e);
            }
        })
    }
}

fn encode_frame(message: &Message, max_frame_len: usize) -> TransportResult<Bytes> {
    let type_len = u16::try_from(message.msg_type.len())
        .map_err(|_| TransportError::other("message type tag too long"))?;
    let body_len = 2 + message.msg_type.len() + message.payload.len();
    if body_len > max_frame_len {
        return Err(TransportError::other(format!(
            "frame of {body_len} bytes exceeds limit of {max_frame_len}"
        )));
    }
    let body_len =
        u32::try_from(body_len).map_err(|_| TransportError::other("frame too large"))?;

    let mut buf = BytesMut::with_capacity(4 + body_len as usize);
    buf.put_u32(body_len);
    buf.put_u16(type_len);
    buf.put_slice(message.msg_type.as_bytes());
    buf.put_slice(&message.payload);
    Ok(buf.freeze())
}

async fn read_frame<R>(reader: &mut R, max_frame_len: usize) -> TransportResult<Message>
where
    R: AsyncRead + Unpin,
{
    let body_len = reader.read_u32().await.map_err(eof_is_close)? as usize;
    if body_len < 2 || body_len > max_frame_len {
        return Err(TransportError::connection(format!(
            "invalid frame length {body_len}"
        )));
    }

    let mut body = BytesMut::zeroed(body_len);
    reader.read_exact(&mut body).await.map_err(eof_is_close)?;
    let mut body = body.freeze();

    let type_len = body.get_u16() as usize;
    if type_len > body.len() {
        return Err(TransportError::connection(format!(
            "type length {type_len} exceeds frame body"
        )));
    }
    let type_bytes = body.split_to(type_len);
    let msg_type = std::str::from_utf8(&type_bytes)
        .map_err(|_| TransportError::other("message type tag is not valid UTF-8"))?;

    Ok(Message::new(msg_type, body))
}

fn eof_is_close(err: std::io::Error) -> TransportError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        TransportError::closed("remote closed the connection")
    } else {
        err.into()
    }
}

//! Transport layer abstraction for the agent.
//!
//! The agent never touches sockets directly. It talks to a [`Transport`]
//! that produces [`Connection`]s, and every failure comes back already
//! classified so the pumps can decide between reconnecting and carrying on:
//!
//! | Variant                          | Kind           | Pump reaction              |
//! |----------------------------------|----------------|----------------------------|
//! | [`TransportError::Connection`]   | `Transient`    | report link loss, exit     |
//! | [`TransportError::Closed`]       | `Closed`       | report link loss, exit     |
//! | [`TransportError::Other`]        | `Unclassified` | log, keep going            |
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │              Supervisor                  │
//! │         (Transport-Agnostic)            │
//! └──────────────────┬──────────────────────┘
//!                    │ connect(address)
//!                    ▼
//!          ┌─────────────────┐
//!          │  TcpTransport   │ ──> TcpConnection (send / receive / close)
//!          └─────────────────┘
//! ```

mod tcp;

pub use tcp::{TcpConnection, TcpTransport, DEFAULT_MAX_FRAME_LEN};

use futures::future::BoxFuture;
use thiserror::Error;

use crate::protocol::Message;

/// Result alias for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Classified transport failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Recoverable network fault (refused, reset, timed out).
    #[error("Connection error: {0}")]
    Connection(String),

    /// The remote end closed the session, or it was closed locally.
    #[error("Connection closed: {0}")]
    Closed(String),

    /// Anything else. Logged by the pumps and otherwise ignored.
    #[error("Transport error: {0}")]
    Other(String),
}

/// Coarse classification of a [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transient connection failure
    Transient,
    /// Terminal close
    Closed,
    /// Unclassified noise
    Unclassified,
}

impl TransportError {
    /// Create a transient connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a terminal close error.
    pub fn closed(message: impl Into<String>) -> Self {
        Self::Closed(message.into())
    }

    /// Create an unclassified error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Transient,
            Self::Closed(_) => ErrorKind::Closed,
            Self::Other(_) => ErrorKind::Unclassified,
        }
    }

    /// Whether this error means the link is gone.
    pub fn is_link_failure(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Unclassified)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;

        match err.kind() {
            Io::UnexpectedEof => Self::Closed(err.to_string()),
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::BrokenPipe
            | Io::TimedOut
            | Io::AddrNotAvailable => Self::Connection(err.to_string()),
            _ => Self::Other(err.to_string()),
        }
    }
}

/// A live, bidirectional link to the backend.
///
/// Implementations must allow `send` and `receive` to run concurrently from
/// different tasks, and `close` must make any pending `receive` return
/// [`TransportError::Closed`].
pub trait Connection: Send + Sync {
    /// Write one message.
    fn send(&self, message: Message) -> BoxFuture<'_, TransportResult<()>>;

    /// Read the next message, waiting until one arrives.
    fn receive(&self) -> BoxFuture<'_, TransportResult<Message>>;

    /// Close the link. Idempotent.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Factory for connections to a backend address.
pub trait Transport: Send + Sync {
    /// Open a connection to `address`.
    fn connect<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, TransportResult<Box<dyn Connection>>>;

    /// Get the transport name for logging.
    fn name(&self) -> &'static str;
}

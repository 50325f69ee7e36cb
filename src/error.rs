//! Agent error types.
//!
//! # Error Classification
//!
//! Only two kinds of error ever reach a caller of this crate:
//!
//! - **Startup**: the initial connect or handshake failed. [`Agent::run`]
//!   returns it and leaves no background task behind.
//! - **Usage**: the caller asked for something the agent cannot do in its
//!   current lifecycle phase (`AlreadyRunning`, `NotRunning`, `Stopped`, `QueueFull`).
//!
//! Everything else (transient link failures, remote closes, protocol errors
//! on a reconnect, dispatch failures) is absorbed by the reconnect loop and
//! reported through the [`EventSink`](crate::agent::EventSink) instead.
//!
//! [`Agent::run`]: crate::agent::Agent::run

use std::time::Duration;

use thiserror::Error;

use crate::protocol::HandshakeError;
use crate::transport::TransportError;

/// Agent errors.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Initial connect or handshake failed; nothing was left running.
    #[error("Startup failed: {0}")]
    Startup(#[source] Box<AgentError>),

    /// Handshake type mismatch or undecodable response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transport-level failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// `run` was called on an agent that is already running.
    #[error("Agent is already running")]
    AlreadyRunning,

    /// The operation requires a running agent.
    #[error("Agent is not running")]
    NotRunning,

    /// The agent has been stopped and cannot be restarted.
    #[error("Agent has been stopped")]
    Stopped,

    /// The outbound queue is full.
    #[error("Outbound queue is full")]
    QueueFull,

    /// The outbound queue has been torn down.
    #[error("Outbound queue is closed")]
    QueueClosed,

    /// A lifecycle operation did not complete within its bound.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Wrap an error as a startup failure.
    pub fn startup(err: impl Into<AgentError>) -> Self {
        AgentError::Startup(Box::new(err.into()))
    }

    /// Check if this is a startup failure.
    pub fn is_startup(&self) -> bool {
        matches!(self, AgentError::Startup(_))
    }
}

impl From<HandshakeError> for AgentError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::Transport(e) => AgentError::Transport(e),
            other => AgentError::Protocol(other.to_string()),
        }
    }
}

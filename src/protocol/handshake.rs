//! Session handshake between agent and backend.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::message::Message;
use super::{AGENT_HANDSHAKE_TYPE, BACKEND_HANDSHAKE_TYPE};
use crate::transport::{Connection, TransportError};

/// Handshake sent by the agent: its subscription manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHandshake {
    /// Check channels the agent subscribes to, in configured order
    pub subscriptions: Vec<String>,
}

impl AgentHandshake {
    /// Create a handshake for the given subscriptions
    pub fn new(subscriptions: &[String]) -> Self {
        Self {
            subscriptions: subscriptions.to_vec(),
        }
    }

    /// Encode as a wire message
    pub fn to_message(&self) -> Result<Message, HandshakeError> {
        Message::json(AGENT_HANDSHAKE_TYPE, self).map_err(HandshakeError::Encode)
    }
}

/// Acknowledgment sent by the backend. Carries no negotiated parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHandshake {}

impl BackendHandshake {
    /// Validate and decode the backend's response
    pub fn from_message(msg: &Message) -> Result<Self, HandshakeError> {
        if !msg.is(BACKEND_HANDSHAKE_TYPE) {
            return Err(HandshakeError::UnexpectedType {
                expected: BACKEND_HANDSHAKE_TYPE.to_string(),
                actual: msg.msg_type.clone(),
            });
        }
        msg.decode().map_err(HandshakeError::Decode)
    }
}

/// Handshake failures.
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// The backend answered with something other than a handshake.
    #[error("backend did not send handshake: expected {expected}, got {actual}")]
    UnexpectedType {
        /// Expected type tag
        expected: String,
        /// Received type tag
        actual: String,
    },

    /// The backend handshake payload could not be decoded.
    #[error("error decoding backend handshake: {0}")]
    Decode(#[source] serde_json::Error),

    /// The agent handshake could not be encoded.
    #[error("error encoding agent handshake: {0}")]
    Encode(#[source] serde_json::Error),

    /// No response within the handshake timeout.
    #[error("backend handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The connection failed mid-handshake.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Run the agent side of the handshake on a freshly connected link.
///
/// The agent handshake is written first without waiting for a greeting, then
/// exactly one message is read. Nothing is retried here.
pub async fn handshake(
    connection: &dyn Connection,
    subscriptions: &[String],
    timeout: Duration,
) -> Result<BackendHandshake, HandshakeError> {
    let hello = AgentHandshake::new(subscriptions).to_message()?;
    connection.send(hello).await?;

    let response = tokio::time::timeout(timeout, connection.receive())
        .await
        .map_err(|_| HandshakeError::Timeout(timeout))??;

    BackendHandshake::from_message(&response)
}

//! Observability events emitted by the supervisor and pumps.
//!
//! The connection core never writes to a console directly. Every state
//! transition and every classified failure becomes an [`AgentEvent`] handed
//! to an [`EventSink`]. [`TracingSink`] is the default and renders events
//! through `tracing`.

use std::fmt;

use super::state::SessionState;

/// Which pump produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpKind {
    /// Outbound queue to wire
    Send,
    /// Wire to dispatcher
    Receive,
}

impl fmt::Display for PumpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Send => "send",
            Self::Receive => "receive",
        })
    }
}

/// Lifecycle and failure events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// The liveness signal moved.
    StateChanged {
        /// Previous state
        from: SessionState,
        /// New state
        to: SessionState,
    },
    /// A connect attempt is starting.
    ConnectAttempt {
        /// Target address
        address: String,
        /// Consecutive failures so far
        failures: u32,
    },
    /// Connect and handshake succeeded; pumps are starting.
    Connected {
        /// New epoch number
        epoch: u64,
        /// Backend address
        address: String,
    },
    /// Connect or handshake failed.
    ConnectFailed {
        /// Target address
        address: String,
        /// Consecutive failures including this one
        failures: u32,
        /// Rendered error
        error: String,
    },
    /// A pump observed a transient or terminal link failure.
    ConnectionLost {
        /// Epoch of the failed connection
        epoch: u64,
        /// Pump that noticed
        pump: PumpKind,
        /// Rendered error
        error: String,
    },
    /// The retry threshold was crossed; the configured address is selected again.
    FallbackToConfigured {
        /// Alternate address being abandoned
        from: String,
        /// Configured address
        to: String,
    },
    /// An alternate backend was selected.
    Redirected {
        /// New address
        address: String,
    },
    /// A pump exited.
    PumpStopped {
        /// Epoch of the pump
        epoch: u64,
        /// Which pump
        pump: PumpKind,
    },
    /// A pump did not exit within its grace period and was aborted.
    PumpAborted {
        /// Epoch of the pump
        epoch: u64,
        /// Which pump
        pump: PumpKind,
    },
    /// An unclassified I/O error; the pump keeps running.
    IoError {
        /// Epoch of the pump
        epoch: u64,
        /// Which pump
        pump: PumpKind,
        /// Rendered error
        error: String,
    },
    /// A message was read from the backend.
    MessageReceived {
        /// Epoch of the connection
        epoch: u64,
        /// Type tag
        msg_type: String,
        /// Payload size
        len: usize,
    },
    /// A handler failed for one inbound message.
    DispatchFailed {
        /// Epoch of the connection
        epoch: u64,
        /// Type tag
        msg_type: String,
        /// Rendered error
        error: String,
    },
    /// Shutdown finished.
    Stopped,
}

/// Destination for [`AgentEvent`]s. Must not block.
pub trait EventSink: Send + Sync {
    /// Record one event.
    fn emit(&self, event: &AgentEvent);
}

/// Default sink: structured `tracing` output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &AgentEvent) {
        match event {
            AgentEvent::StateChanged { from, to } => {
                tracing::debug!(%from, %to, "session state changed");
            },
            AgentEvent::ConnectAttempt { address, failures } => {
                tracing::info!(%address, failures, "connecting to backend");
            },
            AgentEvent::Connected { epoch, address } => {
                tracing::info!(epoch, %address, "connected - starting pumps");
            },
            AgentEvent::ConnectFailed {
                address,
                failures,
                error,
            } => {
                tracing::warn!(%address, failures, %error, "connection error");
            },
            AgentEvent::ConnectionLost { epoch, pump, error } => {
                tracing::warn!(epoch, %pump, %error, "disconnected");
            },
            AgentEvent::FallbackToConfigured { from, to } => {
                tracing::warn!(%from, %to, "retry limit reached - falling back to configured backend");
            },
            AgentEvent::Redirected { address } => {
                tracing::info!(%address, "backend redirected");
            },
            AgentEvent::PumpStopped { epoch, pump } => {
                tracing::debug!(epoch, %pump, "pump stopped");
            },
            AgentEvent::PumpAborted { epoch, pump } => {
                tracing::warn!(epoch, %pump, "pump did not exit in time - aborted");
            },
            AgentEvent::IoError { epoch, pump, error } => {
                tracing::warn!(epoch, %pump, %error, "io error");
            },
            AgentEvent::MessageReceived {
                epoch,
                msg_type,
                len,
            } => {
                tracing::debug!(epoch, %msg_type, len, "message received");
            },
            AgentEvent::DispatchFailed {
                epoch,
                msg_type,
                error,
            } => {
                tracing::warn!(epoch, %msg_type, %error, "error handling message");
            },
            AgentEvent::Stopped => {
                tracing::info!("agent stopped");
            },
        }
    }
}

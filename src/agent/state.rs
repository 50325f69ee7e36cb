//! Session state and the liveness signal.
//!
//! The state lives in a `watch` channel. Only the supervisor holds the
//! [`LivenessCell`] (the sending side); pumps and callers get read-only
//! [`Liveness`] views. Pumps never write liveness themselves, they report
//! link failures to the supervisor instead.

use std::fmt;

use tokio::sync::watch;

/// Per-epoch session state.
///
/// ```text
/// Connecting ──> Handshaking ──> Connected ──> Disconnected ──┐
///     ^                                                       │
///     └───────────────────────────────────────────────────────┘
///
/// any state ── stop() ──> Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Opening a connection
    Connecting,
    /// Connected, waiting for the backend handshake
    Handshaking,
    /// Pumps running on a live connection
    Connected,
    /// No usable connection; the supervisor will reconnect
    Disconnected,
    /// Shut down by `stop`; terminal
    Stopped,
}

impl SessionState {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Stopped => "stopped",
        }
    }

    /// Check if pumps may operate
    pub fn is_connected(&self) -> bool {
        *self == Self::Connected
    }

    /// Check if the session is shut down
    pub fn is_stopped(&self) -> bool {
        *self == Self::Stopped
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Writable liveness signal. Owned by the supervisor alone.
#[derive(Debug)]
pub(crate) struct LivenessCell {
    tx: watch::Sender<SessionState>,
}

impl LivenessCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Disconnected);
        Self { tx }
    }

    /// Set the state, returning the previous one.
    pub(crate) fn set(&self, state: SessionState) -> SessionState {
        self.tx.send_replace(state)
    }

    pub(crate) fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub(crate) fn watch(&self) -> Liveness {
        Liveness {
            rx: self.tx.subscribe(),
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}

/// Read-only view of the liveness signal.
#[derive(Debug, Clone)]
pub(crate) struct Liveness {
    rx: watch::Receiver<SessionState>,
}

impl Liveness {
    pub(crate) fn current(&self) -> SessionState {
        *self.rx.borrow()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.current().is_connected()
    }

    /// Resolve once the session leaves `Connected`.
    pub(crate) async fn lost(&mut self) {
        // A dropped sender means the supervisor is gone: treat as lost.
        let _ = self.rx.wait_for(|s| !s.is_connected()).await;
    }
}

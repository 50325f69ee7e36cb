//! # Sensu Agent Core - Persistent Backend Session
//!
//! Connection core of a monitoring agent: keeps one session with a backend
//! open, ships outbound events to it and dispatches inbound messages to
//! registered handlers.
//!
//! ## Features
//!
//! - **Fail-fast startup**: `run` returns only after connect + handshake succeed
//! - **Bounded outbound queue**: ten messages by default, producers wait when full
//! - **Automatic reconnect**: a supervisor watches liveness on a 100 ms tick
//! - **Redirect and fallback**: alternate backends are abandoned after repeated failures
//! - **Pluggable seams**: transport, retry policy and event sink are traits
//!
//! ## Protocol Overview
//!
//! Every unit on the wire is a typed message: a type tag plus an opaque payload.
//! The session opens with a two-message handshake, after which both directions
//! run independently.
//!
//! ```text
//! Agent                                    Backend
//!   |                                         |
//!   |--- agent_handshake {subscriptions} --->|
//!   |<-- backend_handshake {} ---------------|
//!   |                                         |
//!   |=== event, keepalive, ... =============>|   send pump
//!   |<== check_request, ... =================|   receive pump
//! ```
//!
//! ### Session States
//!
//! ```text
//!   [Disconnected] ──> [Connecting] ──> [Handshaking] ──> [Connected]
//!         ^                 │                 │                │
//!         └──── failure ────┴─────────────────┘   link failure │
//!         └────────────────────────────────────────────────────┘
//!
//!   any state ── stop() ──> [Stopped]
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sensu_agent::{Agent, AgentConfig};
//!
//! #[tokio::main]
//! async fn main() -> sensu_agent::Result<()> {
//!     let config = AgentConfig::new("127.0.0.1:8081", vec!["linux".into()]);
//!     let agent = Agent::new(config)?;
//!
//!     agent.add_handler("check_request", |payload| {
//!         println!("{}", String::from_utf8_lossy(payload));
//!         Ok(())
//!     });
//!
//!     agent.run().await?;
//!     agent.send_message("event", r#"{"check":{"status":0}}"#).await?;
//!     agent.stop().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`agent`]: Agent handle, supervisor, pumps and outbound queue
//! - [`protocol`]: Typed messages and the handshake exchange
//! - [`transport`]: Connection abstraction and the TCP implementation
//! - [`handler`]: Inbound message dispatch table
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod agent;
pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use agent::{
    Agent, AgentBuilder, AgentEvent, EventSink, ExponentialBackoff, FixedInterval, MessageQueue,
    MessageSender, PumpKind, RetryPolicy, SessionState, TracingSink,
};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use handler::{DispatchError, MessageHandler};
pub use protocol::{AgentHandshake, BackendHandshake, HandshakeError, Message};
pub use transport::{Connection, TcpConnection, TcpTransport, Transport, TransportError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

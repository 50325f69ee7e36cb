//! Agent/backend protocol envelope and handshake.
//!
//! Every frame exchanged with the backend is a [`Message`]: a type tag plus an
//! opaque payload. The tag space is shared by both directions but each side
//! routes it through its own dispatch table.
//!
//! # Handshake
//!
//! Before any steady-state traffic, the agent announces its subscription
//! manifest and waits for exactly one acknowledgment:
//!
//! ```text
//! Agent                              Backend
//!    |                                  |
//!    |---- agent_handshake (subs) ----->|  sent first, no greeting awaited
//!    |                                  |
//!    |<--- backend_handshake ({}) ------|  any other tag is a protocol error
//!    |                                  |
//!    |====== events / commands ========>|  pumps start only after this point
//! ```
//!
//! A failed handshake abandons the connect attempt. This layer never retries;
//! the supervisor's reconnect loop starts a fresh connect cycle instead.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sensu_agent::protocol::handshake;
//!
//! let subscriptions = vec!["linux".to_string(), "web".to_string()];
//! handshake(connection.as_ref(), &subscriptions, Duration::from_secs(10)).await?;
//! ```

mod handshake;
mod message;

pub use handshake::{handshake, AgentHandshake, BackendHandshake, HandshakeError};
pub use message::Message;

/// Type tag of the agent's handshake message.
pub const AGENT_HANDSHAKE_TYPE: &str = "agent_handshake";

/// Type tag of the backend's handshake acknowledgment.
pub const BACKEND_HANDSHAKE_TYPE: &str = "backend_handshake";

/// Type tag for check result events sent by the agent.
pub const EVENT_TYPE: &str = "event";

//! Inbound message dispatch.
//!
//! Routes a decoded backend message to the handler registered for its type
//! tag. A failing handler only affects its own message; the connection stays
//! up and the receive pump moves on.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Handler for one message type. Receives the raw payload.
pub type HandlerFn = Arc<dyn Fn(&[u8]) -> anyhow::Result<()> + Send + Sync>;

/// Dispatch failures for a single inbound message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Nothing is registered for this type tag.
    #[error("no handler registered for message type {0}")]
    NoHandler(String),

    /// The handler ran and failed.
    #[error("handler for {msg_type} failed: {message}")]
    Handler {
        /// Type tag of the failed message
        msg_type: String,
        /// Rendered error chain
        message: String,
    },
}

/// Type tag to handler table.
#[derive(Default, Clone)]
pub struct MessageHandler {
    handlers: HashMap<String, HandlerFn>,
}

impl MessageHandler {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `msg_type`, replacing any previous one
    pub fn add_handler<F>(&mut self, msg_type: impl Into<String>, handler: F)
    where
        F: Fn(&[u8]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers.insert(msg_type.into(), Arc::new(handler));
    }

    /// Look up the handler for `msg_type`
    pub fn get(&self, msg_type: &str) -> Option<HandlerFn> {
        self.handlers.get(msg_type).cloned()
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handlers are registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch one message
    pub fn handle(&self, msg_type: &str, payload: &[u8]) -> Result<(), DispatchError> {
        let handler = self
            .get(msg_type)
            .ok_or_else(|| DispatchError::NoHandler(msg_type.to_string()))?;
        invoke(&handler, msg_type, payload)
    }
}

/// Run a handler and render its error chain.
pub(crate) fn invoke(
    handler: &HandlerFn,
    msg_type: &str,
    payload: &[u8],
) -> Result<(), DispatchError> {
    handler(payload).map_err(|e| DispatchError::Handler {
        msg_type: msg_type.to_string(),
        message: format!("{e:#}"),
    })
}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("MessageHandler")
            .field("types", &types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::{anyhow, Context};

    use super::*;

    #[test]
    fn test_dispatch_by_type() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut handler = MessageHandler::new();

        let counter = hits.clone();
        handler.add_handler("check_request", move |payload| {
            assert_eq!(payload, b"{}");
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        handler.handle("check_request", b"{}").unwrap();
        handler.handle("check_request", b"{}").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_type() {
        let handler = MessageHandler::new();
        assert_eq!(
            handler.handle("mystery", b""),
            Err(DispatchError::NoHandler("mystery".to_string()))
        );
    }

    #[test]
    fn test_handler_error_keeps_context() {
        let mut handler = MessageHandler::new();
        handler.add_handler("check_request", |_| {
            Err(anyhow!("bad command")).context("executing check")
        });

        let err = handler.handle("check_request", b"").unwrap_err();
        let DispatchError::Handler { msg_type, message } = err else {
            panic!("expected handler error");
        };
        assert_eq!(msg_type, "check_request");
        assert!(message.contains("executing check"));
        assert!(message.contains("bad command"));
    }

    #[test]
    fn test_replace_handler() {
        let mut handler = MessageHandler::new();
        handler.add_handler("x", |_| Err(anyhow!("old")));
        handler.add_handler("x", |_| Ok(()));

        assert_eq!(handler.len(), 1);
        assert!(handler.handle("x", b"").is_ok());
    }
}

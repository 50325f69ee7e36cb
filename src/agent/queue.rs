//! Bounded outbound queue.
//!
//! Multiple producers, one consumer: whichever send pump owns the current
//! epoch. The consumer side sits behind an async mutex so each epoch's pump
//! takes it over only after the previous one has released it. Producers
//! block when the queue is full; nothing is dropped.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};

use crate::error::{AgentError, Result};
use crate::protocol::Message;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Bounded FIFO of messages waiting for the wire.
#[derive(Debug)]
pub struct MessageQueue {
    sender: MessageSender,
    consumer: Arc<Mutex<mpsc::Receiver<Message>>>,
}

impl MessageQueue {
    /// Create a queue holding at most `capacity` messages
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            sender: MessageSender { tx, capacity },
            consumer: Arc::new(Mutex::new(rx)),
        }
    }

    /// Producer handle
    pub fn sender(&self) -> MessageSender {
        self.sender.clone()
    }

    /// Maximum number of queued messages
    pub fn capacity(&self) -> usize {
        self.sender.capacity
    }

    /// Messages currently waiting
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    /// Check if nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumer side. A pump locks it for the lifetime of its epoch.
    pub(crate) fn consumer(&self) -> Arc<Mutex<mpsc::Receiver<Message>>> {
        self.consumer.clone()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// Cloneable producer handle for the outbound queue.
#[derive(Debug, Clone)]
pub struct MessageSender {
    tx: mpsc::Sender<Message>,
    capacity: usize,
}

impl MessageSender {
    /// Enqueue a message, waiting while the queue is full
    pub async fn send(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| AgentError::QueueClosed)
    }

    /// Enqueue a typed payload, waiting while the queue is full
    pub async fn send_message(
        &self,
        msg_type: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        self.send(Message::new(msg_type, payload)).await
    }

    /// Enqueue without waiting; fails with `QueueFull` instead of blocking
    pub fn try_send(&self, message: Message) -> Result<()> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => AgentError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => AgentError::QueueClosed,
        })
    }

    /// Messages currently waiting
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Check if nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

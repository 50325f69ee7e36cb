//! In-memory transport with a scriptable backend end.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as SyncMutex};

use futures::future::BoxFuture;
use sensu_agent::protocol::{AGENT_HANDSHAKE_TYPE, BACKEND_HANDSHAKE_TYPE};
use sensu_agent::{AgentHandshake, Connection, Message, Transport, TransportError};
use tokio::sync::{mpsc, watch, Mutex};

use super::WAIT;

type Inbound = mpsc::UnboundedReceiver<Result<Message, TransportError>>;

/// Results handed out, in order, to the agent's next `send` calls.
type SendScript = Arc<SyncMutex<VecDeque<TransportError>>>;

/// Hands the backend end of every new connection to the test.
#[derive(Clone)]
pub struct MemoryTransport {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    /// Connections ignore `close`, so pumps parked on them never wake.
    stubborn: bool,
}

impl MemoryTransport {
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                stubborn: false,
            },
            rx,
        )
    }

    pub fn stubborn(mut self) -> Self {
        self.stubborn = true;
        self
    }
}

impl Transport for MemoryTransport {
    fn connect<'a>(
        &'a self,
        _address: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>, TransportError>> {
        Box::pin(async move {
            let (to_backend, from_agent) = mpsc::unbounded_channel();
            let (to_agent, from_backend) = mpsc::unbounded_channel();
            let (closed, _) = watch::channel(false);
            let send_failures = SendScript::default();

            let peer = MemoryPeer {
                inbound: from_agent,
                outbound: to_agent,
                send_failures: send_failures.clone(),
            };
            self.peers
                .send(peer)
                .map_err(|_| TransportError::connection("no backend"))?;

            Ok(Box::new(MemoryConnection {
                outbound: to_backend,
                inbound: Mutex::new(from_backend),
                closed,
                send_failures,
                stubborn: self.stubborn,
            }) as Box<dyn Connection>)
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryConnection {
    outbound: mpsc::UnboundedSender<Message>,
    inbound: Mutex<Inbound>,
    closed: watch::Sender<bool>,
    send_failures: SendScript,
    stubborn: bool,
}

impl Connection for MemoryConnection {
    fn send(&self, message: Message) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if *self.closed.borrow() {
                return Err(TransportError::closed("closed locally"));
            }
            if let Some(err) = self.send_failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            self.outbound
                .send(message)
                .map_err(|_| TransportError::closed("backend gone"))
        })
    }

    fn receive(&self) -> BoxFuture<'_, Result<Message, TransportError>> {
        Box::pin(async move {
            let mut closed = self.closed.subscribe();
            let mut inbound = self.inbound.lock().await;
            tokio::select! {
                _ = closed.wait_for(|c| *c) => Err(TransportError::closed("closed locally")),
                next = inbound.recv() => {
                    next.unwrap_or_else(|| Err(TransportError::closed("backend gone")))
                }
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.stubborn {
                self.closed.send_replace(true);
            }
        })
    }
}

/// Backend end of one in-memory connection.
pub struct MemoryPeer {
    inbound: mpsc::UnboundedReceiver<Message>,
    outbound: mpsc::UnboundedSender<Result<Message, TransportError>>,
    send_failures: SendScript,
}

impl MemoryPeer {
    /// Wait for the next connection the agent opens.
    pub async fn next(peers: &mut mpsc::UnboundedReceiver<MemoryPeer>) -> MemoryPeer {
        tokio::time::timeout(WAIT, peers.recv())
            .await
            .expect("agent never connected")
            .expect("transport dropped")
    }

    pub async fn recv(&mut self) -> Message {
        tokio::time::timeout(WAIT, self.inbound.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("agent side dropped")
    }

    /// Read the agent handshake and acknowledge it.
    pub async fn accept_handshake(&mut self) -> AgentHandshake {
        let hello = self.recv().await;
        assert!(hello.is(AGENT_HANDSHAKE_TYPE));
        self.deliver(Message::new(BACKEND_HANDSHAKE_TYPE, "{}"));
        hello.decode().unwrap()
    }

    pub fn deliver(&self, message: Message) {
        let _ = self.outbound.send(Ok(message));
    }

    /// Make the agent's next `send` fail with `error`; the message is dropped.
    pub fn fail_next_send(&self, error: TransportError) {
        self.send_failures.lock().unwrap().push_back(error);
    }

    /// Make the agent's next `receive` fail with `error`.
    pub fn fail(&self, error: TransportError) {
        let _ = self.outbound.send(Err(error));
    }
}

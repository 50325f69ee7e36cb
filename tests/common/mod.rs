//! Shared fixtures for end-to-end agent tests.

#![allow(dead_code)]

pub mod memory;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use sensu_agent::protocol::BACKEND_HANDSHAKE_TYPE;
use sensu_agent::{
    Agent, AgentConfig, AgentEvent, AgentHandshake, Connection, EventSink, Message, SessionState,
    TcpConnection, TcpTransport, Transport, TransportError,
};
use tokio::net::TcpListener;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Config with short intervals so reconnects happen quickly.
pub fn fast_config(backend_url: impl Into<String>) -> AgentConfig {
    let mut config = AgentConfig::new(backend_url, vec!["linux".into(), "web".into()]);
    config.tick_interval_ms = 20;
    config.reconnect_interval_ms = 10;
    config.handshake_timeout_ms = 2_000;
    config.connect_timeout_ms = 1_000;
    config.stop_timeout_ms = 1_000;
    config
}

/// An address nothing is listening on.
pub async fn refused_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

/// Block until the agent reaches `state`.
pub async fn wait_for_state(agent: &Agent, state: SessionState) {
    wait_until(agent, |s| s == state).await;
}

/// Block until the agent leaves `Connected`. The supervisor may already be
/// reconnecting by the time the caller looks.
pub async fn wait_for_link_loss(agent: &Agent) {
    wait_until(agent, |s| !s.is_connected()).await;
}

async fn wait_until(agent: &Agent, pred: impl Fn(SessionState) -> bool) {
    let mut rx = agent.watch_state();
    tokio::time::timeout(WAIT, rx.wait_for(|s| pred(*s)))
        .await
        .expect("timed out waiting for a state change")
        .unwrap();
}

/// Minimal backend speaking the framed protocol over a real socket.
pub struct FakeBackend {
    listener: TcpListener,
}

impl FakeBackend {
    pub async fn bind() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    pub fn address(&self) -> String {
        self.listener.local_addr().unwrap().to_string()
    }

    pub async fn accept(&self) -> TcpConnection {
        let (stream, _) = tokio::time::timeout(WAIT, self.listener.accept())
            .await
            .expect("agent never connected")
            .unwrap();
        TcpConnection::new(stream)
    }

    /// Accept a connection, read the agent handshake and acknowledge it.
    pub async fn accept_handshake(&self) -> (TcpConnection, AgentHandshake) {
        let conn = self.accept().await;
        let hello = recv(&conn).await;
        let manifest: AgentHandshake = hello.decode().unwrap();
        conn.send(Message::new(BACKEND_HANDSHAKE_TYPE, "{}"))
            .await
            .unwrap();
        (conn, manifest)
    }
}

/// Receive with the test timeout.
pub async fn recv(conn: &TcpConnection) -> Message {
    tokio::time::timeout(WAIT, conn.receive())
        .await
        .expect("timed out waiting for a message")
        .unwrap()
}

/// Event sink that keeps everything it sees.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<AgentEvent>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&AgentEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &AgentEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// TCP transport that records every connect attempt and refuses some targets.
#[derive(Clone)]
pub struct FlakyTransport {
    inner: Arc<TcpTransport>,
    refused: Arc<HashSet<String>>,
    attempts: Arc<Mutex<Vec<String>>>,
}

impl FlakyTransport {
    pub fn refusing(refused: &[&str]) -> Self {
        Self {
            inner: Arc::new(TcpTransport::new(Duration::from_secs(1))),
            refused: Arc::new(refused.iter().map(|s| (*s).to_string()).collect()),
            attempts: Arc::default(),
        }
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

impl Transport for FlakyTransport {
    fn connect<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn Connection>, TransportError>> {
        self.attempts.lock().unwrap().push(address.to_string());
        if self.refused.contains(address) {
            return Box::pin(async move {
                Err(TransportError::connection(format!("{address} refused")))
            });
        }
        self.inner.connect(address)
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

//! The running agent: one persistent session with the backend.
//!
//! # Lifecycle
//!
//! ```text
//!   Agent::new ──> run() ──────────────> stop() ──> Stopped
//!                    │  initial connect      │
//!                    │  + handshake          │ close connection,
//!                    │  (fail fast)          │ join pumps (bounded)
//!                    v                       │
//!              supervisor task ──────────────┘
//!                ├─ send pump     (queue -> wire)
//!                └─ receive pump  (wire  -> handlers)
//! ```
//!
//! `run` returns only after the first connection has completed its handshake.
//! If that fails the error is returned and nothing is left running; the agent
//! can be run again. Afterwards the supervisor reconnects on its own, forever,
//! falling back to the configured backend once the retry threshold is hit.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sensu_agent::{Agent, AgentConfig};
//!
//! let config = AgentConfig::new("127.0.0.1:8081", vec!["linux".into(), "web".into()]);
//! let agent = Agent::new(config)?;
//!
//! agent.add_handler("check_request", |payload| {
//!     println!("check request: {} bytes", payload.len());
//!     Ok(())
//! });
//!
//! agent.run().await?;
//! agent.send_message("event", r#"{"check":"disk"}"#).await?;
//! agent.stop().await?;
//! ```

mod events;
mod pump;
mod queue;
mod retry;
mod state;
mod supervisor;

pub use events::{AgentEvent, EventSink, PumpKind, TracingSink};
pub use queue::{MessageQueue, MessageSender, DEFAULT_QUEUE_CAPACITY};
pub use retry::{ExponentialBackoff, FixedInterval, RetryPolicy};
pub use state::SessionState;

use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use self::pump::SharedHandler;
use self::supervisor::{Command, Supervisor, SupervisorParts};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::handler::MessageHandler;
use crate::protocol::Message;
use crate::transport::{TcpTransport, Transport};

/// Cancels an in-flight `run`. Carries the channel to acknowledge teardown on.
type CancelStart = oneshot::Sender<oneshot::Sender<()>>;

enum Lifecycle {
    /// Built but not running. Holds the supervisor until `run` succeeds.
    Idle(Box<Supervisor>),
    /// `run` is connecting; the supervisor is on loan to it.
    Starting {
        cancel: CancelStart,
        /// Redirect requested before the supervisor came back.
        redirect: Option<String>,
    },
    Running {
        commands: mpsc::Sender<Command>,
        task: JoinHandle<()>,
    },
    Stopped,
}

/// How the initial connect ended.
enum StartOutcome {
    Finished(Result<()>),
    Cancelled(Option<oneshot::Sender<()>>),
}

/// A monitoring agent connected to a backend.
pub struct Agent {
    config: Arc<AgentConfig>,
    handler: SharedHandler,
    queue: MessageQueue,
    state: watch::Receiver<SessionState>,
    backend: watch::Receiver<String>,
    lifecycle: Mutex<Lifecycle>,
}

impl Agent {
    /// Create an agent with the TCP transport and default policies
    pub fn new(config: AgentConfig) -> Result<Self> {
        AgentBuilder::new(config).build()
    }

    /// Start building an agent with custom collaborators
    pub fn builder(config: AgentConfig) -> AgentBuilder {
        AgentBuilder::new(config)
    }

    /// Register a handler for a backend message type
    pub fn add_handler<F>(&self, msg_type: impl Into<String>, handler: F)
    where
        F: Fn(&[u8]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handler
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_handler(msg_type, handler);
    }

    /// Connect, handshake and start the pumps and reconnect loop.
    ///
    /// Returns once the session is `Connected`. On failure the agent stays
    /// idle with no background task and `run` may be called again. A `stop`
    /// issued meanwhile abandons the attempt and `run` returns `Stopped`.
    pub async fn run(&self) -> Result<()> {
        let (mut supervisor, mut cancelled) = {
            let mut lifecycle = self.lifecycle.lock().await;
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Idle(supervisor) => {
                    let (cancel, cancelled) = oneshot::channel();
                    *lifecycle = Lifecycle::Starting {
                        cancel,
                        redirect: None,
                    };
                    (supervisor, cancelled)
                },
                Lifecycle::Stopped => return Err(AgentError::Stopped),
                busy => {
                    *lifecycle = busy;
                    return Err(AgentError::AlreadyRunning);
                },
            }
        };

        // The lifecycle lock is released while connecting so `stop` stays bounded.
        let outcome = tokio::select! {
            biased;
            ack = &mut cancelled => StartOutcome::Cancelled(ack.ok()),
            result = supervisor.start() => StartOutcome::Finished(result),
        };

        let mut lifecycle = self.lifecycle.lock().await;
        match (outcome, std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)) {
            (StartOutcome::Finished(result), Lifecycle::Starting { redirect, .. }) => {
                if let Some(address) = redirect {
                    supervisor.redirect(address);
                }
                match result {
                    Ok(()) => {
                        let (commands, rx) = mpsc::channel(8);
                        let task = tokio::spawn(supervisor.run(rx));
                        *lifecycle = Lifecycle::Running { commands, task };
                        Ok(())
                    },
                    Err(err) => {
                        *lifecycle = Lifecycle::Idle(supervisor);
                        Err(err)
                    },
                }
            },
            // `stop` took over while connecting.
            (outcome, state) => {
                *lifecycle = state;
                drop(lifecycle);

                let ack = match outcome {
                    StartOutcome::Cancelled(ack) => ack,
                    StartOutcome::Finished(_) => cancelled.await.ok(),
                };
                supervisor.shutdown().await;
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                Err(AgentError::Stopped)
            },
        }
    }

    /// Shut down: close the connection and wait for both pumps.
    ///
    /// Returns within the configured stop timeout even if teardown is not
    /// confirmed by then, including while `run` is still connecting.
    /// Stopping a stopped agent is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let timeout = self.config.stop_timeout();
        let deadline = Instant::now() + timeout;

        let mut lifecycle = tokio::time::timeout_at(deadline, self.lifecycle.lock())
            .await
            .map_err(|_| AgentError::Timeout(timeout))?;

        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running { commands, task } => {
                drop(lifecycle);
                let (ack_tx, ack_rx) = oneshot::channel();
                let teardown = async {
                    if commands.send(Command::Stop(ack_tx)).await.is_ok() {
                        let _ = ack_rx.await;
                    }
                };

                if tokio::time::timeout_at(deadline, teardown).await.is_err() {
                    tracing::warn!("agent did not stop within {:?}", timeout);
                    task.abort();
                }
                Ok(())
            },
            Lifecycle::Starting { cancel, .. } => {
                drop(lifecycle);
                let (ack_tx, ack_rx) = oneshot::channel();
                // Fails only if `run` was itself dropped mid-connect.
                if cancel.send(ack_tx).is_ok()
                    && tokio::time::timeout_at(deadline, ack_rx).await.is_err()
                {
                    tracing::warn!("agent start was not abandoned within {:?}", timeout);
                }
                Ok(())
            },
            idle @ Lifecycle::Idle(_) => {
                *lifecycle = idle;
                Err(AgentError::NotRunning)
            },
            Lifecycle::Stopped => Ok(()),
        }
    }

    /// Enqueue a message for the backend, waiting while the queue is full
    pub async fn send_message(
        &self,
        msg_type: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        self.queue.sender().send(Message::new(msg_type, payload)).await
    }

    /// Enqueue without waiting; fails with `QueueFull` instead of blocking
    pub fn try_send_message(
        &self,
        msg_type: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        self.queue.sender().try_send(Message::new(msg_type, payload))
    }

    /// Cloneable producer handle for the outbound queue
    pub fn sender(&self) -> MessageSender {
        self.queue.sender()
    }

    /// Select an alternate backend for subsequent connect attempts.
    ///
    /// The current connection is left alone. After `fallback_threshold`
    /// consecutive failures against the alternate, the configured backend
    /// is selected again.
    pub async fn redirect(&self, address: impl Into<String>) -> Result<()> {
        let address = address.into();
        let mut lifecycle = self.lifecycle.lock().await;

        match &mut *lifecycle {
            Lifecycle::Idle(supervisor) => {
                supervisor.redirect(address);
                Ok(())
            },
            Lifecycle::Starting { redirect, .. } => {
                *redirect = Some(address);
                Ok(())
            },
            Lifecycle::Running { commands, .. } => commands
                .send(Command::Redirect(address))
                .await
                .map_err(|_| AgentError::NotRunning),
            Lifecycle::Stopped => Err(AgentError::Stopped),
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Currently selected backend address
    pub fn backend_url(&self) -> String {
        self.backend.borrow().clone()
    }

    /// Messages waiting in the outbound queue
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Agent configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

/// Builder for [`Agent`] with pluggable transport, retry policy and event sink.
pub struct AgentBuilder {
    config: AgentConfig,
    transport: Option<Arc<dyn Transport>>,
    retry: Option<Arc<dyn RetryPolicy>>,
    events: Option<Arc<dyn EventSink>>,
}

impl AgentBuilder {
    /// Start from a configuration
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            transport: None,
            retry: None,
            events: None,
        }
    }

    /// Use a custom transport (default: TCP)
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Use a custom retry policy (default: fixed `reconnect_interval`).
    /// Its parameters are checked by [`build`](Self::build).
    pub fn retry_policy(mut self, retry: impl RetryPolicy + 'static) -> Self {
        self.retry = Some(Arc::new(retry));
        self
    }

    /// Send events to a custom sink (default: `tracing`)
    pub fn event_sink(mut self, events: impl EventSink + 'static) -> Self {
        self.events = Some(Arc::new(events));
        self
    }

    /// Validate the configuration and build the agent
    pub fn build(self) -> Result<Agent> {
        self.config.validate()?;
        let config = Arc::new(self.config);

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(TcpTransport::new(config.connect_timeout())));
        let retry = self
            .retry
            .unwrap_or_else(|| Arc::new(FixedInterval(config.reconnect_interval())));
        let events = self.events.unwrap_or_else(|| Arc::new(TracingSink));
        retry.validate()?;

        let handler: SharedHandler = Arc::new(RwLock::new(MessageHandler::new()));
        let queue = MessageQueue::new(config.queue_capacity);

        let supervisor = Supervisor::new(SupervisorParts {
            config: config.clone(),
            transport,
            handler: handler.clone(),
            queue: queue.consumer(),
            retry,
            events,
        });

        Ok(Agent {
            config,
            handler,
            state: supervisor.watch_state(),
            backend: supervisor.watch_backend(),
            queue,
            lifecycle: Mutex::new(Lifecycle::Idle(Box::new(supervisor))),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_build_rejects_invalid_retry_policy() {
        let config = AgentConfig::new("127.0.0.1:8081", vec!["linux".into()]);
        let result = Agent::builder(config)
            .retry_policy(ExponentialBackoff::default().with_jitter(2.0))
            .build();
        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[test]
    fn test_build_accepts_closure_policy() {
        let config = AgentConfig::new("127.0.0.1:8081", vec!["linux".into()]);
        let agent = Agent::builder(config)
            .retry_policy(|failures: u32| Duration::from_millis(u64::from(failures)))
            .build()
            .unwrap();
        assert_eq!(agent.state(), SessionState::Disconnected);
        assert_eq!(agent.backend_url(), "127.0.0.1:8081");
    }

    #[tokio::test]
    async fn test_stop_before_run_is_rejected() {
        let agent = Agent::new(AgentConfig::default()).unwrap();
        assert!(matches!(agent.stop().await, Err(AgentError::NotRunning)));
    }
}

//! Connection supervisor.
//!
//! One task owns the whole connection lifecycle: the active connection, the
//! pump handles, the liveness signal, the selected backend address and the
//! retry counter. Reconnect and shutdown both run inside this task, so they
//! can never overlap or wait on the same pumps twice.
//!
//! ```text
//!            ┌────────── tick (Disconnected) ──────────┐
//!            v                                          │
//!   retire epoch ──> connect ──> handshake ──> spawn pumps ──> Connected
//!                       │            │                           │
//!                       └── fail ────┴──> sleep(retry policy)    │ LinkDown report
//!                                         fallback at threshold  v
//!                                                         Disconnected
//! ```

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::events::{AgentEvent, EventSink, PumpKind};
use super::pump::{receive_pump, send_pump, EpochContext, LinkDown, SharedHandler};
use super::retry::RetryPolicy;
use super::state::{LivenessCell, SessionState};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::protocol::{handshake, Message};
use crate::transport::{Connection, Transport};

/// Requests from the agent handle to the supervisor task.
#[derive(Debug)]
pub(crate) enum Command {
    /// Select an alternate backend for subsequent connects.
    Redirect(String),
    /// Tear everything down and acknowledge.
    Stop(oneshot::Sender<()>),
}

/// The connection and pumps of one epoch.
struct ActiveEpoch {
    id: u64,
    connection: Arc<dyn Connection>,
    send: JoinHandle<()>,
    receive: JoinHandle<()>,
}

/// Collaborators the supervisor is built from.
pub(crate) struct SupervisorParts {
    pub(crate) config: Arc<AgentConfig>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) handler: SharedHandler,
    pub(crate) queue: Arc<Mutex<mpsc::Receiver<Message>>>,
    pub(crate) retry: Arc<dyn RetryPolicy>,
    pub(crate) events: Arc<dyn EventSink>,
}

pub(crate) struct Supervisor {
    parts: SupervisorParts,
    state: LivenessCell,
    backend: watch::Sender<String>,
    epoch: u64,
    failures: u32,
    active: Option<ActiveEpoch>,
    reports_tx: mpsc::UnboundedSender<LinkDown>,
    reports_rx: mpsc::UnboundedReceiver<LinkDown>,
}

impl Supervisor {
    pub(crate) fn new(parts: SupervisorParts) -> Self {
        let (backend, _) = watch::channel(parts.config.backend_url.clone());
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();

        Self {
            parts,
            state: LivenessCell::new(),
            backend,
            epoch: 0,
            failures: 0,
            active: None,
            reports_tx,
            reports_rx,
        }
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub(crate) fn watch_backend(&self) -> watch::Receiver<String> {
        self.backend.subscribe()
    }

    /// Initial connect and handshake. On failure nothing is left running.
    pub(crate) async fn start(&mut self) -> Result<()> {
        let address = self.backend.borrow().clone();

        match self.establish(&address).await {
            Ok(connection) => {
                self.spawn_epoch(connection, address);
                Ok(())
            },
            Err(err) => {
                self.transition(SessionState::Disconnected);
                self.parts.events.emit(&AgentEvent::ConnectFailed {
                    address,
                    failures: 1,
                    error: err.to_string(),
                });
                Err(AgentError::startup(err))
            },
        }
    }

    /// Reconnect-watch loop. Runs until stopped or the agent handle is dropped.
    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut ticker = tokio::time::interval(self.parts.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => {
                    if self.handle_command(command).await.is_break() {
                        return;
                    }
                }
                Some(report) = self.reports_rx.recv() => self.on_link_down(report).await,
                _ = ticker.tick() => {
                    if self.state.get() != SessionState::Disconnected {
                        continue;
                    }

                    self.retire_epoch(self.parts.config.stop_timeout()).await;

                    let interrupted = tokio::select! {
                        biased;
                        command = commands.recv() => Some(command),
                        () = self.attempt_reconnect() => None,
                    };
                    if let Some(command) = interrupted {
                        // The attempt was abandoned mid-flight.
                        self.transition(SessionState::Disconnected);
                        if self.handle_command(command).await.is_break() {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Select an alternate backend. Takes effect on the next connect attempt.
    pub(crate) fn redirect(&mut self, address: String) {
        self.failures = 0;
        self.backend.send_replace(address.clone());
        self.parts.events.emit(&AgentEvent::Redirected { address });
    }

    async fn handle_command(&mut self, command: Option<Command>) -> ControlFlow<()> {
        match command {
            Some(Command::Redirect(address)) => {
                self.redirect(address);
                ControlFlow::Continue(())
            },
            Some(Command::Stop(ack)) => {
                self.shutdown().await;
                let _ = ack.send(());
                ControlFlow::Break(())
            },
            // Agent handle dropped.
            None => {
                self.shutdown().await;
                ControlFlow::Break(())
            },
        }
    }

    fn transition(&self, to: SessionState) {
        let from = self.state.set(to);
        if from != to {
            self.parts.events.emit(&AgentEvent::StateChanged { from, to });
        }
    }

    /// Connect and handshake. The connection is closed again on failure.
    async fn establish(&self, address: &str) -> Result<Arc<dyn Connection>> {
        self.transition(SessionState::Connecting);
        self.parts.events.emit(&AgentEvent::ConnectAttempt {
            address: address.to_string(),
            failures: self.failures,
        });

        let connection: Arc<dyn Connection> =
            Arc::from(self.parts.transport.connect(address).await?);

        self.transition(SessionState::Handshaking);
        let config = &self.parts.config;
        if let Err(err) = handshake(
            connection.as_ref(),
            &config.subscriptions,
            config.handshake_timeout(),
        )
        .await
        {
            connection.close().await;
            return Err(err.into());
        }

        Ok(connection)
    }

    fn spawn_epoch(&mut self, connection: Arc<dyn Connection>, address: String) {
        self.epoch += 1;
        // Liveness must read Connected before either pump looks at it.
        self.transition(SessionState::Connected);
        self.parts.events.emit(&AgentEvent::Connected {
            epoch: self.epoch,
            address,
        });

        let ctx = EpochContext {
            epoch: self.epoch,
            connection: connection.clone(),
            liveness: self.state.watch(),
            reports: self.reports_tx.clone(),
            events: self.parts.events.clone(),
        };
        let send = tokio::spawn(send_pump(
            ctx.clone(),
            self.parts.queue.clone(),
            self.parts.config.tick_interval(),
        ));
        let receive = tokio::spawn(receive_pump(ctx, self.parts.handler.clone()));

        self.active = Some(ActiveEpoch {
            id: self.epoch,
            connection,
            send,
            receive,
        });
    }

    async fn attempt_reconnect(&mut self) {
        let address = self.backend.borrow().clone();

        match self.establish(&address).await {
            Ok(connection) => {
                self.failures = 0;
                self.spawn_epoch(connection, address);
            },
            Err(err) => {
                self.transition(SessionState::Disconnected);
                self.failures = self.failures.saturating_add(1);
                self.parts.events.emit(&AgentEvent::ConnectFailed {
                    address: address.clone(),
                    failures: self.failures,
                    error: err.to_string(),
                });

                let delay = self.parts.retry.delay(self.failures);
                if self.failures >= self.parts.config.fallback_threshold {
                    self.fall_back(address);
                }
                tokio::time::sleep(delay).await;
            },
        }
    }

    /// Abandon an alternate target in favour of the configured address.
    fn fall_back(&mut self, from: String) {
        let configured = &self.parts.config.backend_url;
        if from == *configured {
            return;
        }

        self.failures = 0;
        self.backend.send_replace(configured.clone());
        self.parts.events.emit(&AgentEvent::FallbackToConfigured {
            from,
            to: configured.clone(),
        });
    }

    async fn on_link_down(&mut self, report: LinkDown) {
        let current = self.active.as_ref().map(|a| a.id);
        if current != Some(report.epoch) || !self.state.get().is_connected() {
            return;
        }

        self.transition(SessionState::Disconnected);
        self.parts.events.emit(&AgentEvent::ConnectionLost {
            epoch: report.epoch,
            pump: report.pump,
            error: report.error.to_string(),
        });

        // Unblocks whichever pump is still parked on the connection.
        if let Some(active) = &self.active {
            active.connection.close().await;
        }
    }

    /// Close the current connection and wait for both pumps to exit.
    async fn retire_epoch(&mut self, grace: Duration) {
        let Some(active) = self.active.take() else {
            return;
        };

        active.connection.close().await;
        self.join_pump(active.id, PumpKind::Send, active.send, grace).await;
        self.join_pump(active.id, PumpKind::Receive, active.receive, grace).await;
    }

    async fn join_pump(
        &self,
        epoch: u64,
        pump: PumpKind,
        mut handle: JoinHandle<()>,
        grace: Duration,
    ) {
        if tokio::time::timeout(grace, &mut handle).await.is_ok() {
            return;
        }

        handle.abort();
        let _ = handle.await;
        self.parts.events.emit(&AgentEvent::PumpAborted { epoch, pump });
    }

    /// Tear down everything this supervisor owns and enter `Stopped`.
    pub(crate) async fn shutdown(&mut self) {
        self.transition(SessionState::Stopped);
        // Two joins must fit well inside the caller's stop timeout.
        self.retire_epoch(self.parts.config.stop_timeout() / 4).await;
        self.parts.events.emit(&AgentEvent::Stopped);
    }
}

//! Send and receive pumps for one connection epoch.
//!
//! Pumps never mark the session disconnected themselves. On a transient or
//! terminal failure they send a [`LinkDown`] report to the supervisor and
//! exit; the supervisor flips the liveness signal and closes the connection,
//! which in turn unblocks the other pump.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;

use super::events::{AgentEvent, EventSink, PumpKind};
use super::state::Liveness;
use crate::handler::{invoke, DispatchError, MessageHandler};
use crate::protocol::Message;
use crate::transport::{Connection, TransportError};

/// Dispatch table shared between the agent handle and receive pumps.
pub(crate) type SharedHandler = Arc<RwLock<MessageHandler>>;

/// A pump's notice that its connection is gone.
#[derive(Debug)]
pub(crate) struct LinkDown {
    pub(crate) epoch: u64,
    pub(crate) pump: PumpKind,
    pub(crate) error: TransportError,
}

/// What a pump borrows from the supervisor for one epoch.
#[derive(Clone)]
pub(crate) struct EpochContext {
    pub(crate) epoch: u64,
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) liveness: Liveness,
    pub(crate) reports: mpsc::UnboundedSender<LinkDown>,
    pub(crate) events: Arc<dyn EventSink>,
}

impl EpochContext {
    /// Handle a failed send or receive. Returns true if the pump must exit.
    fn on_error(&self, pump: PumpKind, error: TransportError) -> bool {
        if !error.is_link_failure() {
            self.events.emit(&AgentEvent::IoError {
                epoch: self.epoch,
                pump,
                error: error.to_string(),
            });
            return false;
        }

        // Already torn down by someone else; nothing new to report.
        if self.liveness.is_connected() {
            let _ = self.reports.send(LinkDown {
                epoch: self.epoch,
                pump,
                error,
            });
        }
        true
    }

    fn stopped(&self, pump: PumpKind) {
        self.events.emit(&AgentEvent::PumpStopped {
            epoch: self.epoch,
            pump,
        });
    }
}

/// Drain the outbound queue onto the connection in FIFO order.
///
/// Exits as soon as liveness leaves `Connected`, and also polls it on every
/// `tick` independent of queue traffic.
pub(crate) async fn send_pump(
    ctx: EpochContext,
    queue: Arc<Mutex<mpsc::Receiver<Message>>>,
    tick: Duration,
) {
    let mut queue = queue.lock_owned().await;
    let mut liveness = ctx.liveness.clone();
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = liveness.lost() => break,
            // Backstop poll; `lost` normally fires first.
            _ = ticker.tick() => {
                if !ctx.liveness.is_connected() {
                    break;
                }
            }
            msg = queue.recv() => {
                let Some(msg) = msg else {
                    // Every producer is gone; idle until the epoch ends.
                    liveness.lost().await;
                    break;
                };
                if let Err(err) = ctx.connection.send(msg).await {
                    if ctx.on_error(PumpKind::Send, err) {
                        break;
                    }
                }
            }
        }
    }

    ctx.stopped(PumpKind::Send);
}

/// Read from the connection and dispatch until the link fails.
pub(crate) async fn receive_pump(ctx: EpochContext, handler: SharedHandler) {
    while ctx.liveness.is_connected() {
        match ctx.connection.receive().await {
            Ok(msg) => dispatch(&ctx, &handler, &msg),
            Err(err) => {
                if ctx.on_error(PumpKind::Receive, err) {
                    break;
                }
            },
        }
    }

    ctx.stopped(PumpKind::Receive);
}

fn dispatch(ctx: &EpochContext, handler: &SharedHandler, msg: &Message) {
    ctx.events.emit(&AgentEvent::MessageReceived {
        epoch: ctx.epoch,
        msg_type: msg.msg_type.clone(),
        len: msg.len(),
    });

    let entry = handler
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&msg.msg_type);

    let result = match entry {
        Some(f) => std::panic::catch_unwind(AssertUnwindSafe(|| {
            invoke(&f, &msg.msg_type, &msg.payload)
        }))
        .unwrap_or_else(|_| {
            Err(DispatchError::Handler {
                msg_type: msg.msg_type.clone(),
                message: "handler panicked".to_string(),
            })
        }),
        None => Err(DispatchError::NoHandler(msg.msg_type.clone())),
    };

    if let Err(err) = result {
        ctx.events.emit(&AgentEvent::DispatchFailed {
            epoch: ctx.epoch,
            msg_type: msg.msg_type.clone(),
            error: err.to_string(),
        });
    }
}

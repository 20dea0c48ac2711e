//! Long-lived unit agent.
//!
//! The agent is single-threaded and event driven. It multiplexes platform
//! signals, peer store notifications, its own requeue timer and a periodic
//! update-status tick, and hands each resulting signal to the
//! [`RefreshController`] one at a time.

use keel_cluster::StampWatch;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::controller::{ReconcileAction, RefreshController};
use crate::error::{OperatorError, OperatorResult};
use crate::signal::LifecycleSignal;

const SIGNAL_BUFFER: usize = 32;

/// Sends signals to a running [`UnitAgent`] and stops it.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    signals: mpsc::Sender<LifecycleSignal>,
    shutdown: watch::Sender<bool>,
}

impl AgentHandle {
    /// Deliver a lifecycle signal.
    pub async fn send(&self, signal: LifecycleSignal) -> OperatorResult<()> {
        self.signals
            .send(signal)
            .await
            .map_err(|e| OperatorError::InvalidConfig(format!("agent stopped; dropped {}", e.0)))
    }

    /// Ask the agent to stop after the signal it is handling.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Event loop for one unit.
pub struct UnitAgent {
    controller: RefreshController,
    backoff: Backoff,
    update_interval: Duration,
    signals: mpsc::Receiver<LifecycleSignal>,
    shutdown: watch::Receiver<bool>,
    peer_watch: Option<StampWatch>,
}

impl UnitAgent {
    /// Create an agent around `controller` and a handle to drive it.
    pub fn new(controller: RefreshController) -> (Self, AgentHandle) {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = controller.context();
        let backoff = Backoff::new(ctx.config.backoff.clone());
        let update_interval = ctx.config.update_status_interval();
        let peer_watch = ctx.channel.watch();

        let agent = Self {
            controller,
            backoff,
            update_interval,
            signals: signal_rx,
            shutdown: shutdown_rx,
            peer_watch,
        };
        let handle = AgentHandle {
            signals: signal_tx,
            shutdown: shutdown_tx,
        };
        (agent, handle)
    }

    /// Run until shut down.
    pub async fn run(mut self) -> OperatorResult<()> {
        let unit = self.controller.context().unit.clone();
        let mut tick = tokio::time::interval(self.update_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut deadline: Option<Instant> = None;
        let mut signals_open = true;

        info!(unit = %unit, "Unit agent started");

        loop {
            let signal = tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                received = self.signals.recv(), if signals_open => match received {
                    Some(signal) => signal,
                    None => {
                        signals_open = false;
                        continue;
                    }
                },
                () = peer_change(&mut self.peer_watch) => LifecycleSignal::PeerChanged,
                () = requeue_at(deadline) => {
                    deadline = None;
                    LifecycleSignal::Requeue
                }
                _ = tick.tick() => LifecycleSignal::UpdateStatus,
            };

            deadline = self.dispatch(&signal).await;
        }

        info!(unit = %unit, "Unit agent stopped");
        Ok(())
    }

    /// Handle one signal; returns when to requeue, if at all.
    async fn dispatch(&mut self, signal: &LifecycleSignal) -> Option<Instant> {
        let unit = &self.controller.context().unit;
        match self.controller.handle(signal).await {
            Ok(ReconcileAction::Done) => {
                self.backoff.reset();
                None
            }
            Ok(ReconcileAction::Requeue(delay)) => {
                self.backoff.reset();
                Some(Instant::now() + delay)
            }
            Ok(ReconcileAction::Backoff) => self.back_off(),
            Err(e) => {
                error!(unit = %unit, %signal, error = %e, "Reconciliation error");
                self.back_off()
            }
        }
    }

    fn back_off(&mut self) -> Option<Instant> {
        match self.backoff.next_delay() {
            Some(delay) => {
                debug!(
                    attempt = self.backoff.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Backing off"
                );
                Some(Instant::now() + delay)
            }
            None => {
                warn!(
                    unit = %self.controller.context().unit,
                    attempts = self.backoff.attempts(),
                    "Retries exhausted; waiting for the next signal"
                );
                self.backoff.reset();
                None
            }
        }
    }
}

/// Resolves when the peer store reports a write. Never resolves without a
/// watch, or once the watch closes.
async fn peer_change(watch: &mut Option<StampWatch>) {
    let closed = match watch.as_mut() {
        Some(rx) => match rx.recv().await {
            Ok(_) | Err(RecvError::Lagged(_)) => return,
            Err(RecvError::Closed) => true,
        },
        None => false,
    };
    if closed {
        *watch = None;
    }
    std::future::pending::<()>().await
}

async fn requeue_at(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

use crate::ship::core::Shipper;
use crate::ship::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// States of the cycle-driving task. The transitions in [`run_loop`] are the
/// whole concurrency contract: a single task owns the state, so at most one
/// cycle is ever in flight and nothing needs to compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Scheduled,
    Running,
    StoppedDraining,
    Stopped,
}

/// Drives a [`Shipper`] on a periodic tick, with manual triggers coalesced
/// into at most one pending cycle and a final best-effort flush on shutdown.
pub struct Scheduler {
    trigger_tx: mpsc::Sender<()>,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    pub fn start<T>(shipper: Arc<Shipper<T>>, period: Duration) -> Self
    where
        T: Transport + 'static,
    {
        // Capacity 1: a trigger landing while a cycle is running or already
        // scheduled is dropped, not queued.
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(shipper, period, trigger_rx, shutdown_rx));

        Self {
            trigger_tx,
            shutdown_tx,
            handle,
        }
    }

    /// Request a cycle ahead of the next tick.
    pub fn trigger(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    /// Stop scheduling, run one final cycle after any in-flight one
    /// completes, and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if self.handle.await.is_err() {
            warn!("scheduler task panicked during shutdown");
        }
    }
}

async fn run_loop<T>(
    shipper: Arc<Shipper<T>>,
    period: Duration,
    mut trigger_rx: mpsc::Receiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    T: Transport + 'static,
{
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut state = CycleState::Idle;
    loop {
        state = match state {
            CycleState::Idle => {
                tokio::select! {
                    _ = ticker.tick() => CycleState::Scheduled,
                    received = trigger_rx.recv() => match received {
                        Some(()) => CycleState::Scheduled,
                        // All triggers gone means the scheduler handle was
                        // dropped without a shutdown call; drain and stop.
                        None => CycleState::StoppedDraining,
                    },
                    _ = shutdown_rx.changed() => CycleState::StoppedDraining,
                }
            }
            CycleState::Scheduled => CycleState::Running,
            CycleState::Running => {
                let report = shipper.ship_logs().await;
                debug!(
                    batches = report.batches,
                    records = report.records,
                    end = ?report.end,
                    "cycle finished"
                );
                // Anything that arrived while we were busy is coalesced into
                // the cycle that just ran.
                while trigger_rx.try_recv().is_ok() {}

                if *shutdown_rx.borrow() {
                    CycleState::StoppedDraining
                } else {
                    CycleState::Idle
                }
            }
            CycleState::StoppedDraining => {
                let report = shipper.ship_logs().await;
                info!(
                    batches = report.batches,
                    records = report.records,
                    "final flush complete"
                );
                CycleState::Stopped
            }
            CycleState::Stopped => break,
        };
    }
}

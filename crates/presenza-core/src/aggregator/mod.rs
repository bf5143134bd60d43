// ── Presence aggregator ──
//
// Single-writer task owning `PresenceState`. Pollers and the override
// controller send it messages; it recomputes the snapshot on every change
// and publishes it through a `watch` channel, so readers never wait on
// device I/O and never observe a half-applied update.

mod state;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub use state::PresenceState;

use crate::config::{OverridePolicy, PollingConfig};
use crate::error::CoreError;
use crate::model::{ChannelReading, OverrideState, PresenceSnapshot};

const QUEUE_DEPTH: usize = 64;

enum AggregatorMsg {
    Reading(ChannelReading),
    Override {
        state: Option<OverrideState>,
        ack: oneshot::Sender<Arc<PresenceSnapshot>>,
    },
}

/// Cheap, cloneable handle to the aggregator task.
#[derive(Clone)]
pub struct AggregatorHandle {
    tx: mpsc::Sender<AggregatorMsg>,
    snapshot: watch::Receiver<Arc<PresenceSnapshot>>,
}

impl AggregatorHandle {
    /// Spawn the aggregator task. It runs until `cancel` fires.
    pub fn spawn(
        policy: OverridePolicy,
        polling: &PollingConfig,
        initial_override: Option<OverrideState>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let mut state = PresenceState::new(policy, polling.stale_after());
        state.apply_override(initial_override);

        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(state.snapshot()));
        let handle = tokio::spawn(aggregator_task(
            state,
            rx,
            snapshot_tx,
            polling.sweep_interval,
            cancel,
        ));

        (
            Self {
                tx,
                snapshot: snapshot_rx,
            },
            handle,
        )
    }

    /// Feed one poll outcome into the aggregator.
    pub async fn on_channel_update(&self, reading: ChannelReading) -> Result<(), CoreError> {
        self.tx
            .send(AggregatorMsg::Reading(reading))
            .await
            .map_err(|_| CoreError::MonitorStopped)
    }

    /// Replace the override and wait until the new snapshot is published.
    pub async fn on_override_change(
        &self,
        state: Option<OverrideState>,
    ) -> Result<Arc<PresenceSnapshot>, CoreError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(AggregatorMsg::Override { state, ack })
            .await
            .map_err(|_| CoreError::MonitorStopped)?;
        done.await.map_err(|_| CoreError::MonitorStopped)
    }

    /// The latest snapshot. Never blocks on device I/O.
    pub fn current_snapshot(&self) -> Arc<PresenceSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<PresenceSnapshot>> {
        self.snapshot.clone()
    }
}

async fn aggregator_task(
    mut state: PresenceState,
    mut rx: mpsc::Receiver<AggregatorMsg>,
    snapshot_tx: watch::Sender<Arc<PresenceSnapshot>>,
    sweep_interval: std::time::Duration,
    cancel: CancellationToken,
) {
    let mut sweep = tokio::time::interval(sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let publish = |state: &PresenceState| {
        snapshot_tx.send_replace(Arc::new(state.snapshot()));
    };

    info!(policy = %state.policy(), "aggregator started");
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                match msg {
                    AggregatorMsg::Reading(reading) => {
                        if state.apply_reading(reading, Instant::now()) {
                            publish(&state);
                        }
                    }
                    AggregatorMsg::Override { state: next, ack } => {
                        debug!(value = next.as_ref().map(|o| o.value), "override changed");
                        state.apply_override(next);
                        let snapshot = Arc::new(state.snapshot());
                        snapshot_tx.send_replace(Arc::clone(&snapshot));
                        let _ = ack.send(snapshot);
                    }
                }
            }
            _ = sweep.tick() => {
                if state.sweep(Instant::now()) {
                    publish(&state);
                }
            }
        }
    }
    debug!("aggregator stopped");
}

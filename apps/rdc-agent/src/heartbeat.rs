use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::session::{ConnectionState, Outbound, SendError};
use crate::snapshot::SnapshotProvider;

// `interval_at` panics on a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub enum BeatOutcome {
    Sent,
    Skipped(ConnectionState),
    Failed(SendError),
}

/// Periodic snapshot sender bound to one session's outbound handle.
pub struct HeartbeatLoop {
    outbound: Outbound,
    snapshots: Arc<dyn SnapshotProvider>,
    interval: Duration,
}

impl HeartbeatLoop {
    pub fn new(outbound: Outbound, snapshots: Arc<dyn SnapshotProvider>, interval: Duration) -> Self {
        Self {
            outbound,
            snapshots,
            interval: interval.max(MIN_PERIOD),
        }
    }

    /// One emission. Never raises: a closed session is a skip, a write
    /// failure is reported and left for the next tick.
    pub async fn beat(&self) -> BeatOutcome {
        let state = self.outbound.state();
        if state != ConnectionState::Open {
            debug!(
                target: "rdc_agent::heartbeat",
                session = self.outbound.session(),
                %state,
                "websocket not connected; heartbeat skipped"
            );
            return BeatOutcome::Skipped(state);
        }
        let payload = self.snapshots.snapshot();
        match self.outbound.send_json(&payload).await {
            Ok(()) => {
                debug!(
                    target: "rdc_agent::heartbeat",
                    session = self.outbound.session(),
                    observed_at_ms = payload.observed_at_ms,
                    "heartbeat sent"
                );
                BeatOutcome::Sent
            }
            Err(SendError::NotOpen(state)) => {
                debug!(
                    target: "rdc_agent::heartbeat",
                    session = self.outbound.session(),
                    %state,
                    "session closed during heartbeat; skipped"
                );
                BeatOutcome::Skipped(state)
            }
            Err(err) => {
                warn!(
                    target: "rdc_agent::heartbeat",
                    session = self.outbound.session(),
                    error = %err,
                    "failed to send heartbeat"
                );
                BeatOutcome::Failed(err)
            }
        }
    }

    /// Start ticking. The first beat fires one full interval from now.
    pub fn spawn(self) -> HeartbeatHandle {
        let session = self.outbound.session();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.beat().await;
            }
        });
        HeartbeatHandle { session, task }
    }
}

/// Owned heartbeat task. Dropping the handle stops the task.
pub struct HeartbeatHandle {
    session: u64,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

//! Top-level reconnect loop.
//!
//! `Idle -> Connecting -> Running -> (Closed | Errored) -> Waiting -> Connecting -> ...`
//!
//! Every exit from a session, whether a graceful close, a transport error or a
//! panic on the session task, waits `reconnect_delay` and starts over with a
//! brand-new session, handler and heartbeat against the same address.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{error, info, info_span, Instrument};

use crate::agent::AgentSession;
use crate::config::AgentConfig;
use crate::dispatch::Dispatcher;
use crate::executor::CommandExecutor;
use crate::session::{ConnectionState, Session, SessionEnd};
use crate::snapshot::SnapshotProvider;
use crate::transport::Connector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connecting { attempt: u64 },
    Running { attempt: u64 },
    Closed { attempt: u64 },
    Errored { attempt: u64 },
    Waiting { attempt: u64 },
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("gave up after {attempts} connection attempts")]
    RetriesExhausted { attempts: u64 },
}

enum Exit {
    Ended(SessionEnd),
    Panicked(String),
}

impl Exit {
    fn is_error(&self) -> bool {
        match self {
            Exit::Ended(end) => end.is_error(),
            Exit::Panicked(_) => true,
        }
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct Supervisor {
    config: AgentConfig,
    connector: Arc<dyn Connector>,
    snapshots: Arc<dyn SnapshotProvider>,
    executor: Arc<dyn CommandExecutor>,
    phase: watch::Sender<Phase>,
}

impl Supervisor {
    pub fn new(
        config: AgentConfig,
        connector: Arc<dyn Connector>,
        snapshots: Arc<dyn SnapshotProvider>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        Self {
            config,
            connector,
            snapshots,
            executor,
            phase,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn phases(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Runs until the process ends. Returns only when `max_attempts` is set
    /// and has been used up.
    pub async fn run(self) -> Result<(), SupervisorError> {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let exit = self.run_session(attempt).await;
            self.phase.send_replace(if exit.is_error() {
                Phase::Errored { attempt }
            } else {
                Phase::Closed { attempt }
            });
            if let Exit::Panicked(reason) = &exit {
                error!(
                    target: "rdc_agent::supervisor",
                    attempt,
                    error = %reason,
                    "session task failed unexpectedly"
                );
            }

            if let Some(max) = self.config.max_attempts() {
                if attempt >= u64::from(max.get()) {
                    return Err(SupervisorError::RetriesExhausted { attempts: attempt });
                }
            }

            self.phase.send_replace(Phase::Waiting { attempt });
            info!(
                target: "rdc_agent::supervisor",
                attempt,
                delay_ms = self.config.reconnect_delay().as_millis() as u64,
                "reconnecting after delay"
            );
            tokio::time::sleep(self.config.reconnect_delay()).await;
        }
    }

    async fn run_session(&self, attempt: u64) -> Exit {
        self.phase.send_replace(Phase::Connecting { attempt });

        let session = Session::new(
            attempt,
            self.config.server().clone(),
            self.config.connect_timeout(),
        );
        let mut state = session.state();
        let mut handler = AgentSession::new(
            self.snapshots.clone(),
            Dispatcher::new(self.executor.clone()),
            self.config.heartbeat_interval(),
        );
        let connector = self.connector.clone();
        let span = info_span!("session", id = session.id());
        let mut task = tokio::spawn(
            async move { session.run(connector.as_ref(), &mut handler).await }.instrument(span),
        );
        let _guard = AbortOnDrop(task.abort_handle());

        let joined = tokio::select! {
            biased;
            joined = &mut task => joined,
            opened = state.wait_for(ConnectionState::Open) => {
                if opened {
                    self.phase.send_replace(Phase::Running { attempt });
                }
                task.await
            }
        };

        match joined {
            Ok(end) => Exit::Ended(end),
            Err(err) if err.is_panic() => {
                let payload = err.into_panic();
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                Exit::Panicked(reason)
            }
            Err(err) => Exit::Panicked(err.to_string()),
        }
    }
}

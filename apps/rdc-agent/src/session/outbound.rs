use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use super::state::{ConnectionState, StateObserver};
use crate::transport::{FrameSink, TransportError};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("session is {0}, not open")]
    NotOpen(ConnectionState),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Session-scoped write handle.
///
/// Clones share one sink behind an async mutex, so the registration send and
/// the heartbeat task never interleave writes. A handle from a finished
/// session stays bound to that session's sink and state, and every send on it
/// fails with [`SendError::NotOpen`].
#[derive(Clone)]
pub struct Outbound {
    session: u64,
    sink: Arc<AsyncMutex<Box<dyn FrameSink>>>,
    state: StateObserver,
}

impl Outbound {
    pub(crate) fn new(session: u64, sink: Box<dyn FrameSink>, state: StateObserver) -> Self {
        Self {
            session,
            sink: Arc::new(AsyncMutex::new(sink)),
            state,
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    pub async fn send_text(&self, text: String) -> Result<(), SendError> {
        self.ensure_open()?;
        let mut sink = self.sink.lock().await;
        // Teardown may have started while we waited for the lock.
        self.ensure_open()?;
        sink.send_text(text).await?;
        Ok(())
    }

    pub async fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), SendError> {
        self.ensure_open()?;
        let text = serde_json::to_string(value)?;
        self.send_text(text).await
    }

    /// Closes the sink once any in-flight write has finished.
    pub(crate) async fn close(&self) -> Result<(), TransportError> {
        self.sink.lock().await.close().await
    }

    fn ensure_open(&self) -> Result<(), SendError> {
        match self.state.current() {
            ConnectionState::Open => Ok(()),
            other => Err(SendError::NotOpen(other)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingSink;
    use super::*;
    use crate::session::state::StateCell;

    #[tokio::test]
    async fn sends_only_while_open() {
        let cell = StateCell::new();
        let sink = RecordingSink::default();
        let outbound = Outbound::new(7, Box::new(sink.clone()), cell.observer());

        let err = outbound.send_text("early".into()).await.unwrap_err();
        assert!(matches!(err, SendError::NotOpen(ConnectionState::Disconnected)));

        cell.set(ConnectionState::Open);
        outbound.send_json(&serde_json::json!({"n": 1})).await.unwrap();

        cell.set(ConnectionState::Closing);
        let err = outbound.send_text("late".into()).await.unwrap_err();
        assert!(matches!(err, SendError::NotOpen(ConnectionState::Closing)));

        assert_eq!(sink.frames(), vec![r#"{"n":1}"#.to_string()]);
        assert_eq!(cell.observer().current(), ConnectionState::Closing);
    }

    #[tokio::test]
    async fn transport_failures_are_reported_not_raised() {
        let cell = StateCell::new();
        cell.set(ConnectionState::Open);
        let sink = RecordingSink::default();
        sink.set_failing(true);
        let outbound = Outbound::new(1, Box::new(sink.clone()), cell.observer());

        let err = outbound.send_text("beat".into()).await.unwrap_err();
        assert!(matches!(err, SendError::Transport(TransportError::Io(_))));
        assert!(sink.frames().is_empty());
        assert_eq!(outbound.state(), ConnectionState::Open);
    }
}

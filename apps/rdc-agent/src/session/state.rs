use std::fmt;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only writer of a session's state. Lives inside the session.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.tx.send_replace(state);
    }

    pub(crate) fn observer(&self) -> StateObserver {
        StateObserver {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only view of one session's state.
#[derive(Debug, Clone)]
pub struct StateObserver {
    rx: watch::Receiver<ConnectionState>,
}

impl StateObserver {
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.current() == ConnectionState::Open
    }

    /// Resolves once the session has reached `state` (`true`) or has been
    /// torn down without reaching it (`false`).
    pub async fn wait_for(&mut self, state: ConnectionState) -> bool {
        self.rx.wait_for(|current| *current == state).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observers_see_every_transition() {
        let cell = StateCell::new();
        let observer = cell.observer();
        assert_eq!(observer.current(), ConnectionState::Disconnected);

        cell.set(ConnectionState::Connecting);
        cell.set(ConnectionState::Open);
        assert!(observer.is_open());
        assert!(observer.clone().is_open());

        cell.set(ConnectionState::Closing);
        assert_eq!(observer.current(), ConnectionState::Closing);
        assert!(!observer.is_open());
    }

    #[tokio::test]
    async fn wait_for_returns_once_state_is_reached() {
        let cell = StateCell::new();
        let mut observer = cell.observer();
        cell.set(ConnectionState::Open);
        assert!(observer.wait_for(ConnectionState::Open).await);

        let close = async {
            tokio::task::yield_now().await;
            cell.set(ConnectionState::Disconnected);
        };
        let (reached, ()) = tokio::join!(observer.wait_for(ConnectionState::Disconnected), close);
        assert!(reached);
        assert_eq!(observer.current(), ConnectionState::Disconnected);

        let mut orphan = cell.observer();
        drop(cell);
        assert!(!orphan.wait_for(ConnectionState::Open).await);
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::dispatch::Dispatcher;
use crate::heartbeat::{HeartbeatHandle, HeartbeatLoop};
use crate::session::{OpenedSession, SessionEnd, SessionHandler};
use crate::snapshot::SnapshotProvider;
use crate::transport::{Message, TransportError};

/// Per-session handler: registers on open, runs the heartbeat, dispatches
/// inbound commands. Built fresh for every connection attempt.
pub struct AgentSession {
    snapshots: Arc<dyn SnapshotProvider>,
    dispatcher: Dispatcher,
    heartbeat_interval: Duration,
    heartbeat: Option<HeartbeatHandle>,
}

impl AgentSession {
    pub fn new(
        snapshots: Arc<dyn SnapshotProvider>,
        dispatcher: Dispatcher,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            snapshots,
            dispatcher,
            heartbeat_interval,
            heartbeat: None,
        }
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

#[async_trait]
impl SessionHandler for AgentSession {
    async fn on_open(&mut self, session: OpenedSession) {
        info!(
            target: "rdc_agent::agent",
            session = session.id,
            "connected to server; registering"
        );
        let registration = self.snapshots.snapshot();
        if let Err(err) = session.outbound.send_json(&registration).await {
            warn!(
                target: "rdc_agent::agent",
                session = session.id,
                error = %err,
                "registration send failed"
            );
        }
        let heartbeat = HeartbeatLoop::new(
            session.outbound,
            self.snapshots.clone(),
            self.heartbeat_interval,
        );
        self.heartbeat = Some(heartbeat.spawn());
    }

    async fn on_message(&mut self, message: Message) {
        self.dispatcher.dispatch(&message);
    }

    async fn on_error(&mut self, error: &TransportError) {
        warn!(target: "rdc_agent::agent", error = %error, "websocket error");
    }

    async fn on_close(&mut self, _end: &SessionEnd) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerAddress;
    use crate::dispatch::test_support::RecordingExecutor;
    use crate::heartbeat::test_support::CountingSnapshot;
    use crate::session::{ConnectionState, Session};
    use crate::transport::mock::MockConnector;

    const INTERVAL: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_leave_the_session_open() {
        let (connector, mut controller) = MockConnector::new();
        let session = Session::new(
            7,
            ServerAddress::parse("ws://10.0.0.5:9000").unwrap(),
            Duration::from_secs(10),
        );
        let observer = session.state();
        let executor = Arc::new(RecordingExecutor::default());
        let mut agent = AgentSession::new(
            Arc::new(CountingSnapshot::default()),
            Dispatcher::new(executor.clone()),
            INTERVAL,
        );

        let driver = async {
            let mut peer = controller.next_peer().await.unwrap();
            assert!(peer.recv().await.is_some());
            peer.send_text("not json");
            peer.send_text(r#"{"kind":"shutdown"}"#);
            peer.send_text(r#"{"type":42}"#);
            peer.send_binary(vec![0xff, 0xfe, 0x00]);
            peer.send_binary(b"[1,2,3]".to_vec());
            peer.send_text(r#"{"type":"reboot"}"#);
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(observer.current(), ConnectionState::Open);

            // The heartbeat keeps flowing on the same connection.
            assert!(peer.recv().await.is_some());
            assert_eq!(observer.current(), ConnectionState::Open);
            assert_eq!(executor.shutdowns(), 0);

            peer.send_text(r#"{"type":"shutdown"}"#);
            peer.close(1000, "done");
            peer
        };
        let (end, _peer) = tokio::join!(session.run(&connector, &mut agent), driver);

        assert!(matches!(end, SessionEnd::Closed(Some(_))));
        assert_eq!(executor.shutdowns(), 1);
        assert_eq!(controller.attempts().len(), 1);
        assert_eq!(observer.current(), ConnectionState::Disconnected);
        assert!(!agent.heartbeat_running());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_runs_only_while_connected() {
        let (connector, mut controller) = MockConnector::new();
        let session = Session::new(
            1,
            ServerAddress::parse("ws://10.0.0.5:9000").unwrap(),
            Duration::from_secs(10),
        );
        let mut agent = AgentSession::new(
            Arc::new(CountingSnapshot::default()),
            Dispatcher::new(Arc::new(RecordingExecutor::default())),
            INTERVAL,
        );
        assert!(!agent.heartbeat_running());

        let driver = async {
            let mut peer = controller.next_peer().await.unwrap();
            peer.recv().await;
            peer
        };
        let mut peer = {
            let run = session.run(&connector, &mut agent);
            tokio::pin!(run);
            let peer = tokio::select! {
                _ = &mut run => panic!("session ended before the peer closed"),
                peer = driver => peer,
            };
            peer.close(1000, "bye");
            run.await;
            peer
        };

        assert!(!agent.heartbeat_running());
        tokio::time::sleep(INTERVAL * 2).await;
        assert_eq!(peer.try_recv(), None);
    }
}

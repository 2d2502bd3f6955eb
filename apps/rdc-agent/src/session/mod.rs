//! One physical connection to the controller, from connect to close.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::ServerAddress;
use crate::transport::{CloseReason, Connector, Frame, Message, TransportError};

pub mod outbound;
pub mod state;

pub use outbound::{Outbound, SendError};
pub use state::{ConnectionState, StateObserver};

use state::StateCell;

/// Handed to [`SessionHandler::on_open`].
pub struct OpenedSession {
    pub id: u64,
    pub outbound: Outbound,
    pub state: StateObserver,
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Never reached Open.
    ConnectFailed(TransportError),
    /// Peer closed, with or without a close handshake.
    Closed(Option<CloseReason>),
    /// Mid-session transport failure.
    Errored(TransportError),
}

impl SessionEnd {
    pub fn is_error(&self) -> bool {
        !matches!(self, SessionEnd::Closed(_))
    }
}

/// Session event callbacks.
///
/// Every method is awaited on the session's own task, so `on_message` calls
/// never overlap. `on_close` runs exactly once per session, after which the
/// state is `Disconnected` and the outbound handle is dead.
#[async_trait]
pub trait SessionHandler: Send {
    async fn on_open(&mut self, session: OpenedSession);
    async fn on_message(&mut self, message: Message);
    async fn on_error(&mut self, error: &TransportError);
    async fn on_close(&mut self, end: &SessionEnd);
}

pub struct Session {
    id: u64,
    address: ServerAddress,
    connect_timeout: Duration,
    state: StateCell,
}

impl Session {
    pub fn new(id: u64, address: ServerAddress, connect_timeout: Duration) -> Self {
        Self {
            id,
            address,
            connect_timeout,
            state: StateCell::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> StateObserver {
        self.state.observer()
    }

    /// Drive the session until it ends. Failures are reported through the
    /// handler and the returned [`SessionEnd`]; nothing escapes as an error.
    pub async fn run<H>(self, connector: &dyn Connector, handler: &mut H) -> SessionEnd
    where
        H: SessionHandler + ?Sized,
    {
        self.state.set(ConnectionState::Connecting);
        info!(
            target: "rdc_agent::session",
            session = self.id,
            address = %self.address,
            "connecting"
        );

        let connect = connector.connect(&self.address);
        let channel = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(err)) => return self.fail_connect(handler, err).await,
            Err(_) => {
                let err = TransportError::Timeout {
                    address: self.address.to_string(),
                };
                return self.fail_connect(handler, err).await;
            }
        };

        let outbound = Outbound::new(self.id, channel.sink, self.state.observer());
        let mut stream = channel.stream;
        self.state.set(ConnectionState::Open);
        info!(target: "rdc_agent::session", session = self.id, "connected");
        handler
            .on_open(OpenedSession {
                id: self.id,
                outbound: outbound.clone(),
                state: self.state.observer(),
            })
            .await;

        let end = loop {
            match stream.next_frame().await {
                Some(Ok(Frame::Message(message))) => handler.on_message(message).await,
                Some(Ok(Frame::Close(reason))) => break SessionEnd::Closed(reason),
                Some(Err(err)) => {
                    warn!(
                        target: "rdc_agent::session",
                        session = self.id,
                        error = %err,
                        "transport error"
                    );
                    handler.on_error(&err).await;
                    break SessionEnd::Errored(err);
                }
                None => break SessionEnd::Closed(None),
            }
        };

        self.state.set(ConnectionState::Closing);
        if let Err(err) = outbound.close().await {
            debug!(
                target: "rdc_agent::session",
                session = self.id,
                error = %err,
                "close handshake failed"
            );
        }
        drop(stream);
        self.finish(handler, end).await
    }

    async fn fail_connect<H>(&self, handler: &mut H, err: TransportError) -> SessionEnd
    where
        H: SessionHandler + ?Sized,
    {
        warn!(
            target: "rdc_agent::session",
            session = self.id,
            error = %err,
            "connect failed"
        );
        handler.on_error(&err).await;
        self.finish(handler, SessionEnd::ConnectFailed(err)).await
    }

    async fn finish<H>(&self, handler: &mut H, end: SessionEnd) -> SessionEnd
    where
        H: SessionHandler + ?Sized,
    {
        self.state.set(ConnectionState::Disconnected);
        match &end {
            SessionEnd::Closed(Some(reason)) => info!(
                target: "rdc_agent::session",
                session = self.id,
                close = %reason,
                "connection closed"
            ),
            SessionEnd::Closed(None) => {
                info!(target: "rdc_agent::session", session = self.id, "connection closed")
            }
            SessionEnd::ConnectFailed(_) | SessionEnd::Errored(_) => info!(
                target: "rdc_agent::session",
                session = self.id,
                "connection closed after error"
            ),
        }
        handler.on_close(&end).await;
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{ConnectScript, MockConnector};

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Open(u64, ConnectionState),
        Message(Message),
        Error,
        Close(ConnectionState),
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
        state: Option<StateObserver>,
    }

    #[async_trait]
    impl SessionHandler for Recorder {
        async fn on_open(&mut self, session: OpenedSession) {
            self.events.push(Event::Open(session.id, session.state.current()));
            session
                .outbound
                .send_text("registration".into())
                .await
                .unwrap();
            self.state = Some(session.state);
        }

        async fn on_message(&mut self, message: Message) {
            self.events.push(Event::Message(message));
        }

        async fn on_error(&mut self, _error: &TransportError) {
            self.events.push(Event::Error);
        }

        async fn on_close(&mut self, _end: &SessionEnd) {
            let state = self
                .state
                .as_ref()
                .map_or(ConnectionState::Disconnected, StateObserver::current);
            self.events.push(Event::Close(state));
        }
    }

    fn address() -> ServerAddress {
        ServerAddress::parse("ws://10.0.0.5:9000").unwrap()
    }

    #[tokio::test]
    async fn open_precedes_messages_which_arrive_in_order() {
        let (connector, mut controller) = MockConnector::new();
        let session = Session::new(3, address(), Duration::from_secs(10));
        let observer = session.state();
        let mut recorder = Recorder::default();

        let driver = async {
            let mut peer = controller.next_peer().await.unwrap();
            assert_eq!(peer.recv().await.as_deref(), Some("registration"));
            peer.send_text("one");
            peer.send_binary(b"two".to_vec());
            peer.send_text("three");
            peer.close(1000, "bye");
            peer
        };
        let (end, _peer) = tokio::join!(session.run(&connector, &mut recorder), driver);

        assert!(matches!(end, SessionEnd::Closed(Some(CloseReason { code: 1000, .. }))));
        assert_eq!(
            recorder.events,
            vec![
                Event::Open(3, ConnectionState::Open),
                Event::Message(Message::Text("one".into())),
                Event::Message(Message::Binary(b"two".to_vec())),
                Event::Message(Message::Text("three".into())),
                Event::Close(ConnectionState::Disconnected),
            ]
        );
        assert_eq!(observer.current(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn transport_error_is_followed_by_exactly_one_close() {
        let (connector, mut controller) = MockConnector::new();
        let session = Session::new(1, address(), Duration::from_secs(10));
        let mut recorder = Recorder::default();

        let driver = async {
            let mut peer = controller.next_peer().await.unwrap();
            peer.recv().await;
            peer.fail(TransportError::Protocol("reset without closing handshake".into()));
            peer.send_text("never delivered");
            peer
        };
        let (end, _peer) = tokio::join!(session.run(&connector, &mut recorder), driver);

        assert!(matches!(end, SessionEnd::Errored(TransportError::Protocol(_))));
        assert_eq!(
            recorder.events,
            vec![
                Event::Open(1, ConnectionState::Open),
                Event::Error,
                Event::Close(ConnectionState::Disconnected),
            ]
        );
    }

    #[tokio::test]
    async fn refused_connect_reports_error_then_close() {
        let (connector, controller) = MockConnector::new();
        controller.script(ConnectScript::Refuse("connection refused".into()));
        let session = Session::new(1, address(), Duration::from_secs(10));
        let mut recorder = Recorder::default();

        let end = session.run(&connector, &mut recorder).await;

        assert!(matches!(end, SessionEnd::ConnectFailed(TransportError::Connect { .. })));
        assert_eq!(
            recorder.events,
            vec![Event::Error, Event::Close(ConnectionState::Disconnected)]
        );
        assert_eq!(controller.attempts().len(), 1);
        assert_eq!(controller.attempts()[0].address, "ws://10.0.0.5:9000");
    }

    #[tokio::test]
    async fn peer_disappearing_counts_as_close() {
        let (connector, mut controller) = MockConnector::new();
        let session = Session::new(1, address(), Duration::from_secs(10));
        let mut recorder = Recorder::default();

        let driver = async {
            let mut peer = controller.next_peer().await.unwrap();
            peer.recv().await;
            drop(peer);
        };
        let (end, ()) = tokio::join!(session.run(&connector, &mut recorder), driver);

        assert!(matches!(end, SessionEnd::Closed(None)));
        assert_eq!(recorder.events.len(), 2);
    }
}

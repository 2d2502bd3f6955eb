//! In-memory transport for exercising sessions without a network.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{Channel, CloseReason, Connector, Frame, FrameSink, FrameStream, Message, TransportError};
use crate::config::ServerAddress;

/// What the next connect attempt should do.
#[derive(Debug, Clone)]
pub enum ConnectScript {
    Accept,
    Refuse(String),
}

#[derive(Debug, Clone)]
pub struct ConnectAttempt {
    pub address: String,
    pub at: Instant,
}

#[derive(Default)]
struct Shared {
    attempts: Vec<ConnectAttempt>,
    scripts: VecDeque<ConnectScript>,
}

/// Connector half handed to the agent. Accepts by default.
#[derive(Clone)]
pub struct MockConnector {
    shared: Arc<Mutex<Shared>>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

/// Test-side handle: scripts attempts and receives the server end of each
/// accepted connection.
pub struct MockController {
    shared: Arc<Mutex<Shared>>,
    peers: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockConnector {
    pub fn new() -> (Self, MockController) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                shared: shared.clone(),
                peers: tx,
            },
            MockController { shared, peers: rx },
        )
    }
}

impl MockController {
    pub fn script(&self, script: ConnectScript) {
        self.lock().scripts.push_back(script);
    }

    pub fn attempts(&self) -> Vec<ConnectAttempt> {
        self.lock().attempts.clone()
    }

    /// Server end of the next accepted connection.
    pub async fn next_peer(&mut self) -> Option<MockPeer> {
        self.peers.recv().await
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, address: &ServerAddress) -> Result<Channel, TransportError> {
        let script = {
            let mut shared = self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            shared.attempts.push(ConnectAttempt {
                address: address.to_string(),
                at: Instant::now(),
            });
            shared.scripts.pop_front().unwrap_or(ConnectScript::Accept)
        };
        match script {
            ConnectScript::Refuse(reason) => Err(TransportError::Connect {
                address: address.to_string(),
                reason,
            }),
            ConnectScript::Accept => {
                let (out_tx, out_rx) = mpsc::unbounded_channel();
                let (in_tx, in_rx) = mpsc::unbounded_channel();
                let peer = MockPeer {
                    sent: out_rx,
                    inbound: in_tx,
                };
                self.peers.send(peer).map_err(|_| TransportError::Connect {
                    address: address.to_string(),
                    reason: "mock controller dropped".into(),
                })?;
                Ok(Channel {
                    sink: Box::new(MockSink { sent: Some(out_tx) }),
                    stream: Box::new(MockStream { inbound: in_rx }),
                })
            }
        }
    }
}

/// Server end of an in-memory connection.
pub struct MockPeer {
    sent: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<Result<Frame, TransportError>>,
}

impl MockPeer {
    /// Next text frame written by the agent, `None` once its sink is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    /// A frame the agent has already written, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.sent.try_recv().ok()
    }

    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self
            .inbound
            .send(Ok(Frame::Message(Message::Text(text.into()))));
    }

    pub fn send_binary(&self, data: impl Into<Vec<u8>>) {
        let _ = self
            .inbound
            .send(Ok(Frame::Message(Message::Binary(data.into()))));
    }

    pub fn fail(&self, err: TransportError) {
        let _ = self.inbound.send(Err(err));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.inbound.send(Ok(Frame::Close(Some(CloseReason {
            code,
            reason: reason.to_string(),
        }))));
    }
}

struct MockSink {
    sent: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let sent = self.sent.as_ref().ok_or(TransportError::Closed)?;
        sent.send(text).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sent = None;
        Ok(())
    }
}

struct MockStream {
    inbound: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.inbound.recv().await
    }
}

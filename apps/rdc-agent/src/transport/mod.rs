use std::fmt;
use std::io;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ServerAddress;

pub mod mock;
pub mod websocket;

pub use websocket::WebSocketConnector;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },
    #[error("connect to {address} timed out")]
    Timeout { address: String },
    #[error("transport i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connection is closed")]
    Closed,
}

/// Close handshake details reported by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

/// Application data received from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Message(Message),
    Close(Option<CloseReason>),
}

/// Write half of a connection. Not safe for concurrent use; callers serialize.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a connection. `None` means the peer went away.
#[async_trait]
pub trait FrameStream: Send {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}

pub struct Channel {
    pub sink: Box<dyn FrameSink>,
    pub stream: Box<dyn FrameStream>,
}

/// Opens one physical connection per call.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &ServerAddress) -> Result<Channel, TransportError>;
}

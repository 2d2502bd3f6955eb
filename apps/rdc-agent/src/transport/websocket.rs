use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::trace;

use super::{Channel, CloseReason, Connector, Frame, FrameSink, FrameStream, Message, TransportError};
use crate::config::ServerAddress;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production connector: one WebSocket per connect, text frames only outbound.
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, address: &ServerAddress) -> Result<Channel, TransportError> {
        let (ws_stream, response) =
            connect_async(address.as_str())
                .await
                .map_err(|err| TransportError::Connect {
                    address: address.to_string(),
                    reason: err.to_string(),
                })?;
        trace!(
            target: "rdc_agent::transport",
            status = %response.status(),
            "websocket handshake complete"
        );
        let (sink, stream) = ws_stream.split();
        Ok(Channel {
            sink: Box::new(WebSocketSink { inner: sink }),
            stream: Box::new(WebSocketFrames { inner: stream }),
        })
    }
}

struct WebSocketSink {
    inner: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(WsMessage::Text(text))
            .await
            .map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.close().await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(err) => Err(map_ws_error(err)),
        }
    }
}

struct WebSocketFrames {
    inner: SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WebSocketFrames {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let frame = match self.inner.next().await? {
                Ok(WsMessage::Text(text)) => Frame::Message(Message::Text(text)),
                Ok(WsMessage::Binary(data)) => Frame::Message(Message::Binary(data)),
                Ok(WsMessage::Close(close)) => Frame::Close(close.map(|frame| CloseReason {
                    code: u16::from(frame.code),
                    reason: frame.reason.into_owned(),
                })),
                // tungstenite answers pings itself.
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => continue,
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(err) => return Some(Err(map_ws_error(err))),
            };
            return Some(Ok(frame));
        }
    }
}

fn map_ws_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Io(io) => TransportError::Io(io),
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        other => TransportError::Protocol(other.to_string()),
    }
}

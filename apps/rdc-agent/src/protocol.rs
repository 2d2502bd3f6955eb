//! JSON wire format shared with the controller.
//!
//! Outbound registration and heartbeat frames carry the same
//! [`HeartbeatPayload`]. Inbound frames are [`CommandEnvelope`]s keyed by
//! their `type` field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const SHUTDOWN_COMMAND: &str = "shutdown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
}

/// Liveness and telemetry snapshot. Built fresh for every emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(rename = "computer_name")]
    pub identity: String,
    #[serde(rename = "ip")]
    pub address: String,
    /// Host boot time, ms since the Unix epoch.
    #[serde(rename = "start_time")]
    pub start_time_ms: i64,
    #[serde(rename = "up_time")]
    pub uptime_display: String,
    pub uptime_seconds: u64,
    #[serde(rename = "lastSeen")]
    pub observed_at_ms: i64,
    pub status: HostStatus,
}

impl HeartbeatPayload {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("binary frame is not valid UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
    #[error("malformed command envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decoded inbound control message. Fields other than `type` are kept
/// verbatim for command handlers that may need them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Shutdown,
    /// Forward-compatible: recognised as a command, but nothing acts on it.
    Unknown(String),
}

impl CommandEnvelope {
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn decode_bytes(raw: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(std::str::from_utf8(raw)?)
    }

    pub fn command(&self) -> Command {
        match self.kind.as_str() {
            SHUTDOWN_COMMAND => Command::Shutdown,
            other => Command::Unknown(other.to_string()),
        }
    }
}

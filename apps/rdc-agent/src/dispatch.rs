use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::executor::{CommandExecutor, ExecError};
use crate::protocol::{Command, CommandEnvelope, DecodeError};
use crate::telemetry::logging::hex_preview;
use crate::transport::Message;

const PREVIEW_BYTES: usize = 64;

/// Result of handling one inbound frame.
#[derive(Debug)]
pub enum DispatchOutcome {
    Executed(Command),
    Ignored(String),
    Discarded(DecodeError),
    Failed(ExecError),
}

/// Routes decoded command envelopes to the executor. Never fails the session.
#[derive(Clone)]
pub struct Dispatcher {
    executor: Arc<dyn CommandExecutor>,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    pub fn dispatch(&self, message: &Message) -> DispatchOutcome {
        let decoded = match message {
            Message::Text(text) => {
                debug!(target: "rdc_agent::dispatch", message = %text, "message received");
                CommandEnvelope::decode(text)
            }
            Message::Binary(data) => {
                debug!(target: "rdc_agent::dispatch", bytes = data.len(), "binary message received");
                CommandEnvelope::decode_bytes(data).inspect_err(|_| {
                    trace!(
                        target: "rdc_agent::dispatch",
                        bytes = %hex_preview(data, PREVIEW_BYTES),
                        "undecodable frame"
                    );
                })
            }
        };

        let envelope = match decoded {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(target: "rdc_agent::dispatch", error = %err, "discarding message");
                return DispatchOutcome::Discarded(err);
            }
        };

        match envelope.command() {
            Command::Shutdown => {
                info!(target: "rdc_agent::dispatch", "shutdown requested by controller");
                match self.executor.shutdown() {
                    Ok(()) => DispatchOutcome::Executed(Command::Shutdown),
                    Err(err) => {
                        error!(target: "rdc_agent::dispatch", error = %err, "shutdown failed");
                        DispatchOutcome::Failed(err)
                    }
                }
            }
            Command::Unknown(kind) => {
                debug!(target: "rdc_agent::dispatch", command = %kind, "ignoring unsupported command");
                DispatchOutcome::Ignored(kind)
            }
        }
    }
}

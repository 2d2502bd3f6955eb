use thiserror::Error;

use crate::config::ConfigError;
use crate::supervisor::SupervisorError;
use crate::telemetry::logging::InitError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("logging initialization failed: {0}")]
    Logging(#[from] InitError),
    #[error("{0}")]
    Supervisor(#[from] SupervisorError),
}

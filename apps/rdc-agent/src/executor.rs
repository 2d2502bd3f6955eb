use std::io;
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("shutdown is not supported on {0}")]
    Unsupported(&'static str),
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: &'static str,
        source: io::Error,
    },
}

/// Privileged host actions requested by the controller.
pub trait CommandExecutor: Send + Sync {
    /// Begin powering the host off. May never return if it succeeds quickly.
    fn shutdown(&self) -> Result<(), ExecError>;
}

/// Runs the platform's own `shutdown` utility without waiting on it.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostExecutor;

impl HostExecutor {
    /// Program and arguments used on the current platform.
    pub fn shutdown_invocation() -> Result<(&'static str, &'static [&'static str]), ExecError> {
        if cfg!(windows) {
            Ok(("shutdown", &["/s", "/f", "/t", "1"]))
        } else if cfg!(target_os = "linux") {
            Ok(("shutdown", &["now"]))
        } else if cfg!(target_os = "macos") {
            Ok(("shutdown", &["-h", "now"]))
        } else {
            Err(ExecError::Unsupported(std::env::consts::OS))
        }
    }
}

impl CommandExecutor for HostExecutor {
    fn shutdown(&self) -> Result<(), ExecError> {
        let (program, args) = Self::shutdown_invocation()?;
        info!(
            target: "rdc_agent::executor",
            program,
            args = ?args,
            "executing shutdown sequence"
        );
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(drop)
            .map_err(|source| ExecError::Spawn { program, source })
    }
}

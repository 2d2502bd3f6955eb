use std::sync::Arc;

use tracing::info;

use crate::autostart::{Autostart, HostAutostart, NoAutostart};
use crate::cli::Cli;
use crate::config::{
    resolve_server_address, AddressPrompt, AgentConfig, ConfigError, ConfigFile, ServerAddress,
    StdinPrompt,
};
use crate::error::AgentError;
use crate::executor::{CommandExecutor, HostExecutor};
use crate::snapshot::{SnapshotProvider, SystemSnapshot};
use crate::supervisor::Supervisor;
use crate::transport::{Connector, WebSocketConnector};

/// Where the server address comes from.
pub enum AddressSource<'a> {
    /// Explicit override; validated but never persisted.
    Override(&'a str),
    File {
        file: ConfigFile,
        prompt: &'a dyn AddressPrompt,
        autostart: &'a dyn Autostart,
    },
}

impl AddressSource<'_> {
    pub fn resolve(&self) -> Result<ServerAddress, AgentError> {
        let server = match self {
            AddressSource::Override(raw) => ServerAddress::parse(raw)?,
            AddressSource::File {
                file,
                prompt,
                autostart,
            } => resolve_server_address(file, *prompt, *autostart)?,
        };
        Ok(server)
    }
}

/// Collaborators wired into the supervisor.
pub struct Runtime {
    pub connector: Arc<dyn Connector>,
    pub snapshots: Arc<dyn SnapshotProvider>,
    pub executor: Arc<dyn CommandExecutor>,
}

impl Runtime {
    pub fn host() -> Self {
        Self {
            connector: Arc::new(WebSocketConnector::new()),
            snapshots: Arc::new(SystemSnapshot::new()),
            executor: Arc::new(HostExecutor),
        }
    }
}

/// Resolve configuration and build the supervisor. Fails before any
/// connection is attempted if the address is missing or invalid.
pub fn prepare(
    source: &AddressSource<'_>,
    configure: impl FnOnce(AgentConfig) -> Result<AgentConfig, ConfigError>,
    runtime: Runtime,
) -> Result<Supervisor, AgentError> {
    let server = source.resolve()?;
    let config = configure(AgentConfig::new(server))?;
    info!(
        target: "rdc_agent::app",
        address = %config.server(),
        heartbeat_secs = config.heartbeat_interval().as_secs(),
        "connecting to controller"
    );
    Ok(Supervisor::new(
        config,
        runtime.connector,
        runtime.snapshots,
        runtime.executor,
    ))
}

pub async fn run(cli: Cli) -> Result<(), AgentError> {
    let file = ConfigFile::absolute(&cli.config)?;
    let autostart: Box<dyn Autostart> = if cli.no_autostart {
        Box::new(NoAutostart)
    } else {
        Box::new(HostAutostart::current(file.path()))
    };
    let source = match cli.server.as_deref() {
        Some(raw) => AddressSource::Override(raw),
        None => AddressSource::File {
            file,
            prompt: &StdinPrompt,
            autostart: autostart.as_ref(),
        },
    };

    let supervisor = prepare(
        &source,
        |config| {
            config
                .with_heartbeat_interval(cli.heartbeat_interval())?
                .with_reconnect_delay(cli.reconnect_delay())?
                .with_connect_timeout(cli.connect_timeout())
        },
        Runtime::host(),
    )?;

    tokio::select! {
        result = supervisor.run() => Ok(result?),
        _ = tokio::signal::ctrl_c() => {
            info!(target: "rdc_agent::app", "interrupt received; exiting");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::test_support::RecordingExecutor;
    use crate::heartbeat::test_support::CountingSnapshot;
    use crate::transport::mock::{MockConnector, MockController};

    struct NoAnswer;

    impl AddressPrompt for NoAnswer {
        fn ask(&self) -> Result<Option<String>, ConfigError> {
            Ok(None)
        }
    }

    struct Answer(&'static str);

    impl AddressPrompt for Answer {
        fn ask(&self) -> Result<Option<String>, ConfigError> {
            Ok(Some(self.0.to_string()))
        }
    }

    fn runtime() -> (Runtime, MockController) {
        let (connector, controller) = MockConnector::new();
        (
            Runtime {
                connector: Arc::new(connector),
                snapshots: Arc::new(CountingSnapshot::default()),
                executor: Arc::new(RecordingExecutor::default()),
            },
            controller,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn address_without_websocket_scheme_halts_before_connecting() {
        let (runtime, controller) = runtime();
        let result = prepare(&AddressSource::Override("10.0.0.5:9000"), Ok, runtime);
        assert!(matches!(
            result,
            Err(AgentError::Config(ConfigError::InvalidAddress { .. }))
        ));

        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        assert!(controller.attempts().is_empty());
    }

    #[tokio::test]
    async fn stored_address_without_scheme_halts_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile::new(dir.path().join("config.json"));
        std::fs::write(file.path(), r#"{"server":"10.0.0.5:9000"}"#).unwrap();
        let (runtime, controller) = runtime();

        let source = AddressSource::File {
            file,
            prompt: &NoAnswer,
            autostart: &NoAutostart,
        };
        let result = prepare(&source, Ok, runtime);
        assert!(matches!(
            result,
            Err(AgentError::Config(ConfigError::InvalidAddress { .. }))
        ));
        assert!(controller.attempts().is_empty());
    }

    #[tokio::test]
    async fn first_run_answer_configures_the_supervisor() {
        let dir = tempfile::tempdir().unwrap();
        let source = AddressSource::File {
            file: ConfigFile::new(dir.path().join("config.json")),
            prompt: &Answer("ws://10.0.0.5:9000"),
            autostart: &NoAutostart,
        };
        let (runtime, _controller) = runtime();

        let supervisor = prepare(
            &source,
            |c| c.with_heartbeat_interval(std::time::Duration::from_secs(15)),
            runtime,
        )
        .unwrap();
        assert_eq!(supervisor.config().server().as_str(), "ws://10.0.0.5:9000");
        assert_eq!(
            supervisor.config().heartbeat_interval(),
            std::time::Duration::from_secs(15)
        );
        assert!(dir.path().join("config.json").is_file());
    }

    #[tokio::test]
    async fn zero_interval_halts_before_connecting() {
        let (runtime, controller) = runtime();
        let result = prepare(
            &AddressSource::Override("ws://10.0.0.5:9000"),
            |c| c.with_heartbeat_interval(std::time::Duration::ZERO),
            runtime,
        );
        assert!(matches!(
            result,
            Err(AgentError::Config(ConfigError::ZeroDuration { .. }))
        ));
        assert!(controller.attempts().is_empty());
    }
}

use std::process::ExitCode;

use clap::Parser;
use rdc_agent::cli::Cli;
use rdc_agent::error::AgentError;
use rdc_agent::{app, telemetry};

#[tokio::main]
async fn main() -> ExitCode {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    let _logging = match telemetry::logging::init(&cli.logging.to_config()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("rdc-agent: {}", AgentError::from(err));
            return ExitCode::FAILURE;
        }
    };

    match app::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(target: "rdc_agent", error = %err, "agent stopped");
            eprintln!("rdc-agent: {err}");
            ExitCode::FAILURE
        }
    }
}

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};

use crate::config::DEFAULT_CONFIG_FILE;
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "rdc-agent",
    about = "Keeps this host registered with a remote desktop controller and runs its commands",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "RDC_AGENT_CONFIG",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_FILE,
        help = "Config file holding the controller address; created on first run"
    )]
    pub config: PathBuf,

    #[arg(
        long,
        env = "RDC_AGENT_SERVER",
        value_name = "URL",
        help = "Controller WebSocket URL (ws:// or wss://); overrides the config file without saving"
    )]
    pub server: Option<String>,

    #[arg(
        long = "heartbeat-interval",
        env = "RDC_AGENT_HEARTBEAT_INTERVAL",
        value_name = "SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds between heartbeats"
    )]
    pub heartbeat_interval_secs: u64,

    #[arg(
        long = "reconnect-delay",
        env = "RDC_AGENT_RECONNECT_DELAY",
        value_name = "SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds to wait before reconnecting after the connection ends"
    )]
    pub reconnect_delay_secs: u64,

    #[arg(
        long = "connect-timeout",
        env = "RDC_AGENT_CONNECT_TIMEOUT",
        value_name = "SECS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds allowed for each connection attempt"
    )]
    pub connect_timeout_secs: u64,

    #[arg(
        long = "no-autostart",
        env = "RDC_AGENT_NO_AUTOSTART",
        action = clap::ArgAction::SetTrue,
        value_parser = clap::builder::FalseyValueParser::new(),
        help = "Do not register the agent to start at login on first run"
    )]
    pub no_autostart: bool,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl Cli {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "RDC_AGENT_LOG_LEVEL",
        default_value_t = LogLevel::Info,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "RDC_AGENT_LOG_FILE",
        help = "Append logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,

    #[arg(
        long = "trace-deps",
        env = "RDC_AGENT_TRACE_DEPS",
        action = clap::ArgAction::SetTrue,
        value_parser = clap::builder::FalseyValueParser::new(),
        help = "At trace level, also trace the WebSocket and TLS crates"
    )]
    pub trace_deps: bool,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
            dependency_traces: self.trace_deps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn defaults_match_agent_policy() {
        let cli = Cli::try_parse_from(["rdc-agent"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.json"));
        assert_eq!(cli.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(cli.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(cli.connect_timeout(), Duration::from_secs(10));
        assert!(!cli.no_autostart);
        assert_eq!(cli.logging.level, LogLevel::Info);
    }

    #[test_timeout::timeout]
    fn zero_durations_are_rejected() {
        for flag in ["--heartbeat-interval", "--reconnect-delay", "--connect-timeout"] {
            assert!(
                Cli::try_parse_from(["rdc-agent", flag, "0"]).is_err(),
                "{flag} accepted 0"
            );
        }
    }

    #[test_timeout::timeout]
    fn overrides_are_parsed() {
        let cli = Cli::try_parse_from([
            "rdc-agent",
            "--server",
            "wss://controller.example.com",
            "--config",
            "/etc/rdc-agent.json",
            "--no-autostart",
            "--log-level",
            "trace",
            "--trace-deps",
        ])
        .unwrap();
        assert_eq!(cli.server.as_deref(), Some("wss://controller.example.com"));
        assert_eq!(cli.config, PathBuf::from("/etc/rdc-agent.json"));
        assert!(cli.no_autostart);
        let logging = cli.logging.to_config();
        assert_eq!(logging.level, LogLevel::Trace);
        assert!(logging.dependency_traces);
    }
}

pub mod logging {
    //! Process-wide `tracing` setup. The agent usually runs unattended from
    //! a login entry, so file output is plain text with UTC timestamps and
    //! every line inside a session carries its `session{id=..}` span.

    use std::fmt::Write as _;
    use std::fs::{File, OpenOptions};
    use std::path::{Path, PathBuf};

    use clap::ValueEnum;
    use thiserror::Error;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::filter::ParseError;
    use tracing_subscriber::fmt::time::UtcTime;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    pub const FILTER_ENV: &str = "RDC_AGENT_LOG_FILTER";

    /// Transport crates whose trace output buries session events.
    const NOISY_TARGETS: &[&str] = &["tokio_tungstenite", "tungstenite", "rustls", "mio"];

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        Warn,
        #[default]
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        // Above info only the agent's own targets get louder.
        fn directive(self) -> &'static str {
            match self {
                LogLevel::Error => "error",
                LogLevel::Warn => "warn",
                LogLevel::Info => "info",
                LogLevel::Debug => "info,rdc_agent=debug",
                LogLevel::Trace => "info,rdc_agent=trace",
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        /// Append here instead of stderr.
        pub file: Option<PathBuf>,
        /// At trace level, let the transport crates trace too.
        pub dependency_traces: bool,
    }

    impl LogConfig {
        /// The `EnvFilter` directive to install. A non-blank override (from
        /// `RDC_AGENT_LOG_FILTER`) replaces the level-derived one entirely.
        pub fn filter_directive(&self, override_directive: Option<&str>) -> String {
            if let Some(directive) = override_directive.map(str::trim).filter(|d| !d.is_empty()) {
                return directive.to_owned();
            }
            let mut directive = self.level.directive().to_owned();
            if self.caps_dependencies() {
                for target in NOISY_TARGETS {
                    let _ = write!(directive, ",{target}=info");
                }
            }
            directive
        }

        fn caps_dependencies(&self) -> bool {
            self.level == LogLevel::Trace && !self.dependency_traces
        }
    }

    #[derive(Debug, Error)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("invalid log filter '{directive}': {source}")]
        Filter {
            directive: String,
            source: ParseError,
        },
        #[error("a global logger is already installed")]
        AlreadyInstalled,
    }

    /// Flushes buffered lines when dropped. Hold it until the process exits.
    #[must_use = "dropping the guard stops log output"]
    pub struct LogGuard {
        _worker: WorkerGuard,
    }

    pub fn init(config: &LogConfig) -> Result<LogGuard, InitError> {
        let override_directive = std::env::var(FILTER_ENV).ok();
        let directive = config.filter_directive(override_directive.as_deref());
        let filter = EnvFilter::try_new(&directive).map_err(|source| InitError::Filter {
            directive: directive.clone(),
            source,
        })?;

        let (writer, worker) = match &config.file {
            Some(path) => tracing_appender::non_blocking(open_append(path)?),
            None => tracing_appender::non_blocking(std::io::stderr()),
        };
        let layer = fmt::layer()
            .with_writer(writer)
            .with_timer(UtcTime::rfc_3339())
            .with_ansi(config.file.is_none())
            .with_target(config.level >= LogLevel::Debug)
            .with_thread_names(config.level == LogLevel::Trace);

        tracing_subscriber::registry()
            .with(filter)
            .with(layer)
            .try_init()
            .map_err(|_| InitError::AlreadyInstalled)?;

        if override_directive.is_none() && config.caps_dependencies() {
            tracing::debug!(
                target: "rdc_agent::logging",
                "transport crates capped at info; pass --trace-deps to trace them"
            );
        }
        Ok(LogGuard { _worker: worker })
    }

    fn open_append(path: &Path) -> Result<File, InitError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| InitError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Hex of the first `limit` bytes of a frame, on one line.
    pub fn hex_preview(bytes: &[u8], limit: usize) -> String {
        let shown = &bytes[..bytes.len().min(limit)];
        let mut out = String::with_capacity(shown.len() * 3 + 16);
        for (i, byte) in shown.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{byte:02x}");
        }
        if bytes.len() > shown.len() {
            let _ = write!(out, " .. (+{} bytes)", bytes.len() - shown.len());
        }
        out
    }

}

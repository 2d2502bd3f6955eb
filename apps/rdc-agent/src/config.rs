use std::fmt;
use std::fs;
use std::io::{self, BufRead, Write};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::autostart::Autostart;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const PROMPT: &str = "Enter full WebSocket URL (e.g., ws://1.2.3.4:5000 or wss://example.com): ";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no server address provided")]
    NoAddressProvided,
    #[error("invalid server address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("no server address found in config file {0:?}")]
    MissingServer(PathBuf),
    #[error("config file {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("config file {path:?} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to read server address from prompt: {0}")]
    Prompt(#[source] io::Error),
    #[error("{setting} must be greater than zero")]
    ZeroDuration { setting: &'static str },
}

/// Controller endpoint. Always non-empty and always `ws://` or `wss://`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress(String);

impl ServerAddress {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        let invalid = |reason: &str| ConfigError::InvalidAddress {
            address: trimmed.to_string(),
            reason: reason.to_string(),
        };
        if trimmed.is_empty() {
            return Err(ConfigError::NoAddressProvided);
        }
        if !(trimmed.starts_with("ws://") || trimmed.starts_with("wss://")) {
            return Err(invalid("must start with ws:// or wss://"));
        }
        let url = Url::parse(trimmed).map_err(|err| invalid(&err.to_string()))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_secure(&self) -> bool {
        self.0.starts_with("wss://")
    }
}

impl FromStr for ServerAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the supervisor needs, resolved once before the first connect.
/// Every duration is non-zero.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    server: ServerAddress,
    heartbeat_interval: Duration,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    max_attempts: Option<NonZeroU32>,
}

impl AgentConfig {
    pub fn new(server: ServerAddress) -> Self {
        Self {
            server,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_attempts: None,
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Result<Self, ConfigError> {
        self.heartbeat_interval = non_zero("heartbeat interval", interval)?;
        Ok(self)
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Result<Self, ConfigError> {
        self.reconnect_delay = non_zero("reconnect delay", delay)?;
        Ok(self)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Result<Self, ConfigError> {
        self.connect_timeout = non_zero("connect timeout", timeout)?;
        Ok(self)
    }

    pub fn with_max_attempts(mut self, attempts: NonZeroU32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn server(&self) -> &ServerAddress {
        &self.server
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// `None` retries forever.
    pub fn max_attempts(&self) -> Option<NonZeroU32> {
        self.max_attempts
    }
}

fn non_zero(setting: &'static str, value: Duration) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        Err(ConfigError::ZeroDuration { setting })
    } else {
        Ok(value)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    server: Option<String>,
}

/// The persisted `{"server": "..."}` document.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Like [`ConfigFile::new`], with a relative path anchored at `base`.
    pub fn anchored(path: impl Into<PathBuf>, base: &Path) -> Self {
        let path = path.into();
        if path.is_absolute() {
            Self { path }
        } else {
            Self {
                path: base.join(path),
            }
        }
    }

    /// Anchors a relative path at the current directory, so the location
    /// survives a relaunch from elsewhere.
    pub fn absolute(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(Self::anchored(path, &cwd))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> Result<ServerAddress, ConfigError> {
        let raw = fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        let stored: StoredConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?;
        match stored.server.as_deref().map(str::trim) {
            Some(server) if !server.is_empty() => ServerAddress::parse(server),
            _ => Err(ConfigError::MissingServer(self.path.clone())),
        }
    }

    pub fn save(&self, server: &ServerAddress) -> Result<(), ConfigError> {
        let stored = StoredConfig {
            server: Some(server.as_str().to_string()),
        };
        let json = serde_json::to_string_pretty(&stored).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, json).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Source of a server address on first run.
pub trait AddressPrompt {
    /// `Ok(None)` when the operator gave no answer.
    fn ask(&self) -> Result<Option<String>, ConfigError>;
}

pub struct StdinPrompt;

impl AddressPrompt for StdinPrompt {
    fn ask(&self) -> Result<Option<String>, ConfigError> {
        let mut stdout = io::stdout();
        stdout
            .write_all(PROMPT.as_bytes())
            .and_then(|()| stdout.flush())
            .map_err(ConfigError::Prompt)?;
        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(ConfigError::Prompt)?;
        let answer = line.trim();
        if read == 0 || answer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(answer.to_string()))
        }
    }
}

/// Resolve the controller address, prompting and persisting on first run.
///
/// Autostart registration happens only after a freshly prompted address has
/// been written; its failure is logged and otherwise ignored.
pub fn resolve_server_address(
    file: &ConfigFile,
    prompt: &dyn AddressPrompt,
    autostart: &dyn Autostart,
) -> Result<ServerAddress, ConfigError> {
    if !file.exists() {
        let answer = prompt.ask()?.ok_or(ConfigError::NoAddressProvided)?;
        let server = ServerAddress::parse(&answer)?;
        file.save(&server)?;
        info!(
            target: "rdc_agent::config",
            path = %file.path().display(),
            address = %server,
            "saved server address"
        );
        match autostart.register() {
            Ok(entry) => info!(
                target: "rdc_agent::config",
                entry = %entry.display(),
                "registered agent for login autostart"
            ),
            Err(err) => warn!(
                target: "rdc_agent::config",
                error = %err,
                "failed to register agent for autostart"
            ),
        }
    }
    file.load()
}

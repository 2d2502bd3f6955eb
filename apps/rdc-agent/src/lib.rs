pub mod agent;
pub mod app;
pub mod autostart;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod heartbeat;
pub mod protocol;
pub mod session;
pub mod snapshot;
pub mod supervisor;
pub mod telemetry;
pub mod transport;

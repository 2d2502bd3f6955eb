use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use sysinfo::System;
use time::OffsetDateTime;
use tracing::debug;

use crate::protocol::{HeartbeatPayload, HostStatus};

const UNKNOWN_HOST: &str = "unknown";
const ROUTE_PROBE: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 80);

/// Produces the payload for registration and heartbeat frames.
pub trait SnapshotProvider: Send + Sync {
    fn snapshot(&self) -> HeartbeatPayload;
}

/// Snapshot of the local host: name, primary IPv4 address and uptime.
pub struct SystemSnapshot {
    identity: String,
}

impl SystemSnapshot {
    pub fn new() -> Self {
        let identity = System::host_name()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_HOST.to_string());
        Self { identity }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl Default for SystemSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotProvider for SystemSnapshot {
    fn snapshot(&self) -> HeartbeatPayload {
        build_payload(
            self.identity.clone(),
            local_address(),
            System::boot_time(),
            now_ms(),
        )
    }
}

/// Assemble a payload from raw readings. Uptime is measured against `now_ms`.
pub fn build_payload(
    identity: String,
    address: String,
    boot_time_secs: u64,
    now_ms: i64,
) -> HeartbeatPayload {
    let start_time_ms = i64::try_from(boot_time_secs)
        .unwrap_or(i64::MAX / 1000)
        .saturating_mul(1000);
    let uptime_seconds = u64::try_from(now_ms.saturating_sub(start_time_ms) / 1000).unwrap_or(0);
    HeartbeatPayload {
        identity,
        address,
        start_time_ms,
        uptime_display: format_uptime(uptime_seconds),
        uptime_seconds,
        observed_at_ms: now_ms,
        status: HostStatus::Online,
    }
}

/// `"{hours}h {minutes}m"`; hours are not wrapped into days.
pub fn format_uptime(uptime_seconds: u64) -> String {
    let hours = uptime_seconds / 3600;
    let minutes = (uptime_seconds % 3600) / 60;
    format!("{hours}h {minutes}m")
}

pub fn now_ms() -> i64 {
    i64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

/// IPv4 address of the interface holding the default route.
///
/// Connecting a UDP socket only selects a route; nothing is sent.
pub fn local_address() -> String {
    route_address()
        .or_else(interface_address)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| Ipv4Addr::UNSPECIFIED.to_string())
}

fn route_address() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    if let Err(err) = socket.connect(ROUTE_PROBE) {
        debug!(target: "rdc_agent::snapshot", error = %err, "no default route");
        return None;
    }
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

fn interface_address() -> Option<IpAddr> {
    let interfaces = match if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(err) => {
            debug!(target: "rdc_agent::snapshot", error = %err, "failed to list interfaces");
            return None;
        }
    };
    interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .map(|iface| iface.ip())
        .find(IpAddr::is_ipv4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_is_rendered_in_hours_and_minutes() {
        assert_eq!(format_uptime(0), "0h 0m");
        assert_eq!(format_uptime(59), "0h 0m");
        assert_eq!(format_uptime(3_660), "1h 1m");
        assert_eq!(format_uptime(93_780), "26h 3m");
    }

    #[test]
    fn payload_derives_uptime_from_boot_time() {
        let payload = build_payload(
            "WS-0142".into(),
            "10.0.0.17".into(),
            1_700_000_000,
            1_700_003_725_900,
        );
        assert_eq!(payload.start_time_ms, 1_700_000_000_000);
        assert_eq!(payload.uptime_seconds, 3_725);
        assert_eq!(payload.uptime_display, "1h 2m");
        assert_eq!(payload.observed_at_ms, 1_700_003_725_900);
        assert_eq!(payload.status, HostStatus::Online);
    }

    #[test]
    fn clock_skew_never_yields_negative_uptime() {
        let payload = build_payload("h".into(), "0.0.0.0".into(), 2_000, 1_000_000);
        assert_eq!(payload.uptime_seconds, 0);
        assert_eq!(payload.uptime_display, "0h 0m");
    }

    #[test]
    fn system_snapshot_is_online_and_fresh() {
        let provider = SystemSnapshot::new();
        assert!(!provider.identity().is_empty());

        let before = now_ms();
        let payload = provider.snapshot();
        assert_eq!(payload.identity, provider.identity());
        assert_eq!(payload.status, HostStatus::Online);
        assert!(payload.observed_at_ms >= before);
        assert!(payload.address.parse::<Ipv4Addr>().is_ok());
    }
}

//! Local status provider: tunnel state, traffic and host metrics for the
//! module's own UI.
//!
//! Everything here degrades to zero-valued structures when the host is not
//! Linux or a /proc file is unreadable; status must never fail the API.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use eitec_vpn_core::command::{CommandRunner, QUERY_TIMEOUT};
use eitec_vpn_core::telemetry;
use eitec_vpn_core::types::TrafficReport;

#[derive(Debug, Clone, Default, Serialize)]
pub struct VpnStatus {
    pub configured: bool,
    pub running: bool,
    pub interface: String,
    pub endpoint: Option<String>,
    pub latest_handshake: Option<DateTime<Utc>>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemMetrics {
    pub load_1m: f64,
    pub load_5m: f64,
    pub load_15m: f64,
    pub uptime_secs: u64,
    pub mem_total_kb: u64,
    pub mem_available_kb: u64,
    pub disk_total_kb: u64,
    pub disk_available_kb: u64,
    pub interfaces: Vec<NetInterfaceStats>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct NetInterfaceStats {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub vpn: VpnStatus,
    pub system: SystemMetrics,
    pub taken_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct StatusService {
    runner: CommandRunner,
    interface: String,
    config_path: PathBuf,
}

impl StatusService {
    pub fn new(runner: CommandRunner, interface: &str, config_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            interface: interface.to_string(),
            config_path: config_path.into(),
        }
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            vpn: self.vpn_status().await,
            system: self.system_metrics().await,
            taken_at: Some(Utc::now()),
        }
    }

    pub async fn vpn_status(&self) -> VpnStatus {
        let configured = self.config_path.exists();
        let mut status = VpnStatus {
            configured,
            interface: self.interface.clone(),
            ..VpnStatus::default()
        };

        match telemetry::fetch(&self.runner, &self.interface).await {
            Ok(snapshot) => {
                status.running = true;
                // The gateway tunnel has a single peer: the server.
                if let Some(peer) = snapshot.peers.first() {
                    status.endpoint = peer.endpoint.clone();
                    status.latest_handshake = peer.latest_handshake;
                    status.rx_bytes = peer.rx_bytes;
                    status.tx_bytes = peer.tx_bytes;
                }
            }
            Err(e) => debug!(interface = %self.interface, error = %e, "tunnel telemetry unavailable"),
        }
        status
    }

    /// rx/tx of the server peer, for the traffic reporter. None while the
    /// tunnel is down.
    pub async fn traffic(&self) -> Option<TrafficReport> {
        let snapshot = telemetry::fetch(&self.runner, &self.interface).await.ok()?;
        let peer = snapshot.peers.first()?;
        Some(TrafficReport {
            rx_bytes: peer.rx_bytes,
            tx_bytes: peer.tx_bytes,
        })
    }

    #[cfg(target_os = "linux")]
    pub async fn system_metrics(&self) -> SystemMetrics {
        let mut metrics = SystemMetrics::default();

        if let Ok(loadavg) = tokio::fs::read_to_string("/proc/loadavg").await {
            if let Some((l1, l5, l15)) = parse_loadavg(&loadavg) {
                metrics.load_1m = l1;
                metrics.load_5m = l5;
                metrics.load_15m = l15;
            }
        }
        if let Ok(uptime) = tokio::fs::read_to_string("/proc/uptime").await {
            metrics.uptime_secs = parse_uptime(&uptime).unwrap_or(0);
        }
        if let Ok(meminfo) = tokio::fs::read_to_string("/proc/meminfo").await {
            let (total, available) = parse_meminfo(&meminfo);
            metrics.mem_total_kb = total;
            metrics.mem_available_kb = available;
        }
        if let Ok(net_dev) = tokio::fs::read_to_string("/proc/net/dev").await {
            metrics.interfaces = parse_net_dev(&net_dev);
        }

        if let Ok(output) = self.runner.run("df", &["-P", "-k", "/"], QUERY_TIMEOUT).await {
            if output.success() {
                if let Some((total, available)) = parse_df(&output.stdout) {
                    metrics.disk_total_kb = total;
                    metrics.disk_available_kb = available;
                }
            }
        }

        metrics
    }

    #[cfg(not(target_os = "linux"))]
    pub async fn system_metrics(&self) -> SystemMetrics {
        SystemMetrics::default()
    }
}

// -- /proc parsing -----------------------------------------------------------

pub(crate) fn parse_loadavg(content: &str) -> Option<(f64, f64, f64)> {
    let mut fields = content.split_whitespace();
    let l1 = fields.next()?.parse().ok()?;
    let l5 = fields.next()?.parse().ok()?;
    let l15 = fields.next()?.parse().ok()?;
    Some((l1, l5, l15))
}

pub(crate) fn parse_uptime(content: &str) -> Option<u64> {
    let first = content.split_whitespace().next()?;
    first.parse::<f64>().ok().map(|v| v as u64)
}

pub(crate) fn parse_meminfo(content: &str) -> (u64, u64) {
    let mut total = 0;
    let mut available = 0;
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some("MemTotal:"), Some(value)) => total = value.parse().unwrap_or(0),
            (Some("MemAvailable:"), Some(value)) => available = value.parse().unwrap_or(0),
            _ => {}
        }
    }
    (total, available)
}

/// `/proc/net/dev`: two header lines, then `iface: rx_bytes … tx_bytes …`
/// with tx_bytes at field 9 after the name.
pub(crate) fn parse_net_dev(content: &str) -> Vec<NetInterfaceStats> {
    let mut result = Vec::new();
    for line in content.lines().skip(2) {
        let Some((name, rest)) = line.split_once(':') else {
            continue;
        };
        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() < 9 {
            continue;
        }
        let name = name.trim();
        if name == "lo" {
            continue;
        }
        result.push(NetInterfaceStats {
            name: name.to_string(),
            rx_bytes: fields[0].parse().unwrap_or(0),
            tx_bytes: fields[8].parse().unwrap_or(0),
        });
    }
    result
}

/// `df -P -k /`: header line, then one row whose fields are
/// `filesystem total used available capacity mountpoint`.
pub(crate) fn parse_df(output: &str) -> Option<(u64, u64)> {
    let row = output.lines().nth(1)?;
    let fields: Vec<&str> = row.split_whitespace().collect();
    if fields.len() < 4 {
        return None;
    }
    Some((fields[1].parse().ok()?, fields[3].parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loadavg_parsing() {
        let parsed = parse_loadavg("0.52 0.58 0.59 1/521 12345\n").unwrap();
        assert_eq!(parsed, (0.52, 0.58, 0.59));
        assert!(parse_loadavg("garbage").is_none());
    }

    #[test]
    fn uptime_parsing() {
        assert_eq!(parse_uptime("12345.67 54321.00\n"), Some(12345));
        assert_eq!(parse_uptime(""), None);
    }

    #[test]
    fn meminfo_parsing() {
        let content = "MemTotal:       16384000 kB\nMemFree:         1024000 kB\nMemAvailable:    8192000 kB\n";
        assert_eq!(parse_meminfo(content), (16384000, 8192000));
        assert_eq!(parse_meminfo(""), (0, 0));
    }

    #[test]
    fn net_dev_parsing_skips_headers_and_loopback() {
        let content = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 1000    10    0    0    0     0          0         0     1000     10    0    0    0     0       0          0
  eth0: 123456  100   0    0    0     0          0         0     654321   90    0    0    0     0       0          0
   wg0: 2048    5     0    0    0     0          0         0     4096     6    0    0    0     0       0          0
";
        let parsed = parse_net_dev(content);
        assert_eq!(
            parsed,
            vec![
                NetInterfaceStats {
                    name: "eth0".into(),
                    rx_bytes: 123456,
                    tx_bytes: 654321,
                },
                NetInterfaceStats {
                    name: "wg0".into(),
                    rx_bytes: 2048,
                    tx_bytes: 4096,
                },
            ]
        );
    }

    #[test]
    fn df_parsing() {
        let output = "\
Filesystem     1024-blocks     Used Available Capacity Mounted on
/dev/sda1         51474912 20000000  28835328      41% /
";
        assert_eq!(parse_df(output), Some((51474912, 28835328)));
        assert_eq!(parse_df("no rows"), None);
    }
}

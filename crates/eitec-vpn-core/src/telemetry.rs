// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Telemetry adapter over `wg show <iface> dump`.
//!
//! The dump format is one record per line, tab-separated. The first line
//! describes the interface (`private_key public_key listen_port fwmark`),
//! every following line a peer (`public_key preshared_key endpoint
//! allowed_ips latest_handshake rx_bytes tx_bytes persistent_keepalive`).

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::command::{CommandError, CommandRunner, QUERY_TIMEOUT};

/// A peer is online iff its latest handshake is within this window.
pub const WIREGUARD_ONLINE_TIMEOUT: Duration = Duration::from_secs(120);
/// A peer unseen for longer than this is aged to offline.
pub const WIREGUARD_OFFLINE_TIMEOUT: Duration = Duration::from_secs(120);
/// A module whose handshake is older than this is offline even when the
/// kernel still lists it.
pub const STALE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("interface {interface} does not exist")]
    InterfaceAbsent { interface: String },

    #[error("wg is not installed or not in PATH")]
    ToolMissing,

    #[error("malformed dump line: {line:?}")]
    Parse { line: String },

    #[error("wg show failed: {stderr}")]
    Telemetry { stderr: String },
}

impl From<CommandError> for TelemetryError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::ToolMissing { .. } => Self::ToolMissing,
            other => Self::Telemetry {
                stderr: other.to_string(),
            },
        }
    }
}

/// The interface record of a dump.
#[derive(Debug, Clone)]
pub struct InterfaceDump {
    pub private_key: String,
    pub public_key: String,
    pub listen_port: u16,
    pub fwmark: Option<String>,
}

/// One peer record of a dump.
#[derive(Debug, Clone)]
pub struct PeerDump {
    pub public_key: String,
    pub preshared_key: Option<String>,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<String>,
    pub latest_handshake: Option<DateTime<Utc>>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub persistent_keepalive: Option<u16>,
}

impl PeerDump {
    /// Seconds since the last handshake, if there ever was one.
    pub fn handshake_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.latest_handshake
            .map(|hs| (now - hs).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn is_online(&self, now: DateTime<Utc>) -> bool {
        matches!(self.handshake_age(now), Some(age) if age <= WIREGUARD_ONLINE_TIMEOUT)
    }
}

/// Parsed output of `wg show <iface> dump` at one instant.
#[derive(Debug, Clone)]
pub struct TelemetrySnapshot {
    pub interface: InterfaceDump,
    pub peers: Vec<PeerDump>,
    pub taken_at: DateTime<Utc>,
}

impl TelemetrySnapshot {
    pub fn peer(&self, public_key: &str) -> Option<&PeerDump> {
        self.peers.iter().find(|p| p.public_key == public_key)
    }

    pub fn total_rx(&self) -> u64 {
        self.peers.iter().map(|p| p.rx_bytes).sum()
    }

    pub fn total_tx(&self) -> u64 {
        self.peers.iter().map(|p| p.tx_bytes).sum()
    }
}

/// Invoke `wg show <interface> dump` and parse the result.
pub async fn fetch(
    runner: &CommandRunner,
    interface: &str,
) -> Result<TelemetrySnapshot, TelemetryError> {
    let output = runner
        .run("wg", &["show", interface, "dump"], QUERY_TIMEOUT)
        .await?;

    if !output.success() {
        if output.stderr.contains("No such device") {
            return Err(TelemetryError::InterfaceAbsent {
                interface: interface.to_string(),
            });
        }
        return Err(TelemetryError::Telemetry {
            stderr: output.combined(),
        });
    }

    parse_dump(&output.stdout, Utc::now())
}

/// Parse a dump document. `taken_at` is recorded on the snapshot so status
/// derivation and tests share one notion of "now".
pub fn parse_dump(
    output: &str,
    taken_at: DateTime<Utc>,
) -> Result<TelemetrySnapshot, TelemetryError> {
    let mut lines = output.lines().filter(|l| !l.trim().is_empty());

    let interface_line = lines.next().ok_or_else(|| TelemetryError::Parse {
        line: String::new(),
    })?;
    let interface = parse_interface_line(interface_line)?;

    let mut peers = Vec::new();
    for line in lines {
        peers.push(parse_peer_line(line)?);
    }

    Ok(TelemetrySnapshot {
        interface,
        peers,
        taken_at,
    })
}

fn parse_interface_line(line: &str) -> Result<InterfaceDump, TelemetryError> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 4 {
        return Err(TelemetryError::Parse { line: line.into() });
    }

    Ok(InterfaceDump {
        private_key: fields[0].to_string(),
        public_key: fields[1].to_string(),
        listen_port: fields[2].parse().map_err(|_| TelemetryError::Parse {
            line: line.into(),
        })?,
        fwmark: none_marker(fields[3]),
    })
}

fn parse_peer_line(line: &str) -> Result<PeerDump, TelemetryError> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 8 {
        return Err(TelemetryError::Parse { line: line.into() });
    }

    let parse_err = || TelemetryError::Parse { line: line.into() };

    let handshake_unix: i64 = fields[4].parse().map_err(|_| parse_err())?;
    let latest_handshake = if handshake_unix == 0 {
        None
    } else {
        Utc.timestamp_opt(handshake_unix, 0).single()
    };

    let persistent_keepalive = match fields[7] {
        "off" | "0" => None,
        value => Some(value.parse().map_err(|_| parse_err())?),
    };

    Ok(PeerDump {
        public_key: fields[0].to_string(),
        preshared_key: none_marker(fields[1]),
        endpoint: none_marker(fields[2]),
        allowed_ips: fields[3]
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "(none)")
            .map(str::to_string)
            .collect(),
        latest_handshake,
        rx_bytes: fields[5].parse().map_err(|_| parse_err())?,
        tx_bytes: fields[6].parse().map_err(|_| parse_err())?,
        persistent_keepalive,
    })
}

fn none_marker(field: &str) -> Option<String> {
    match field {
        "" | "(none)" | "off" => None,
        value => Some(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IFACE_LINE: &str = "cHJpdmF0ZS1rZXktcHJpdmF0ZS1rZXktcHJpdmF0ZT0=\tcHVibGljLWtleS1wdWJsaWMta2V5LXB1YmxpYy1rZXk9\t51820\toff";

    fn dump_with_peer(peer_line: &str) -> String {
        format!("{IFACE_LINE}\n{peer_line}\n")
    }

    #[test]
    fn parses_interface_line() {
        let snap = parse_dump(IFACE_LINE, Utc::now()).unwrap();
        assert_eq!(snap.interface.listen_port, 51820);
        assert!(snap.interface.fwmark.is_none());
        assert!(snap.peers.is_empty());
    }

    #[test]
    fn parses_full_peer_line() {
        let dump = dump_with_peer(
            "UEVFUi1QVUJMSUMtS0VZLVBFRVItUFVCTElDLUtFWT0=\t(none)\t203.0.113.9:51820\t10.10.0.2/32,192.168.50.0/24\t1700000000\t1024\t2048\t25",
        );
        let snap = parse_dump(&dump, Utc::now()).unwrap();
        assert_eq!(snap.peers.len(), 1);

        let peer = &snap.peers[0];
        assert!(peer.preshared_key.is_none());
        assert_eq!(peer.endpoint.as_deref(), Some("203.0.113.9:51820"));
        assert_eq!(peer.allowed_ips, vec!["10.10.0.2/32", "192.168.50.0/24"]);
        assert_eq!(peer.rx_bytes, 1024);
        assert_eq!(peer.tx_bytes, 2048);
        assert_eq!(peer.persistent_keepalive, Some(25));
        assert!(peer.latest_handshake.is_some());
    }

    #[test]
    fn tolerates_none_endpoint_zero_handshake_off_keepalive() {
        let dump = dump_with_peer(
            "UEVFUi1QVUJMSUMtS0VZLVBFRVItUFVCTElDLUtFWT0=\t(none)\t(none)\t10.10.0.2/32\t0\t0\t0\toff",
        );
        let snap = parse_dump(&dump, Utc::now()).unwrap();
        let peer = &snap.peers[0];
        assert!(peer.endpoint.is_none());
        assert!(peer.latest_handshake.is_none());
        assert!(peer.persistent_keepalive.is_none());
    }

    #[test]
    fn short_peer_line_is_a_parse_error() {
        let dump = dump_with_peer("only\tfour\tfields\there");
        let err = parse_dump(&dump, Utc::now()).unwrap_err();
        assert!(matches!(err, TelemetryError::Parse { .. }));
    }

    #[test]
    fn empty_output_is_a_parse_error() {
        assert!(matches!(
            parse_dump("", Utc::now()),
            Err(TelemetryError::Parse { .. })
        ));
    }

    #[test]
    fn online_classification_uses_the_two_minute_window() {
        let now = Utc::now();
        let fresh = now - chrono::Duration::seconds(30);
        let stale = now - chrono::Duration::seconds(180);

        let mut peer = PeerDump {
            public_key: "k".into(),
            preshared_key: None,
            endpoint: None,
            allowed_ips: vec![],
            latest_handshake: Some(fresh),
            rx_bytes: 0,
            tx_bytes: 0,
            persistent_keepalive: None,
        };
        assert!(peer.is_online(now));

        peer.latest_handshake = Some(stale);
        assert!(!peer.is_online(now));

        peer.latest_handshake = None;
        assert!(!peer.is_online(now));
    }

    #[test]
    fn totals_sum_over_peers() {
        let dump = format!(
            "{IFACE_LINE}\n{}\n{}\n",
            "QQ==\t(none)\t(none)\t10.10.0.2/32\t0\t100\t200\toff",
            "Qg==\t(none)\t(none)\t10.10.0.3/32\t0\t11\t22\toff",
        );
        let snap = parse_dump(&dump, Utc::now()).unwrap();
        assert_eq!(snap.total_rx(), 111);
        assert_eq!(snap.total_tx(), 222);
    }
}

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

//! Deterministic rendering of WireGuard configs from the database model.
//!
//! The server-side render is the canonical form: `rebuild` compares it
//! byte-for-byte against `/etc/wireguard/<iface>.conf`, so nothing here may
//! depend on iteration order, clocks or randomness.

use std::fmt::Write as _;

use crate::db::interfaces::Interface;
use crate::db::peers::{Module, UserVpn};

/// The placeholder LAN the original deployments shipped with; treated as
/// "no LAN configured" everywhere.
pub const DEFAULT_INTERNAL_NETWORK: &str = "192.168.1.0/24";

/// Render the full server-side config for an interface: one `[Interface]`
/// block, one `[Peer]` block per module in id order, then one per active
/// user VPN in id order.
pub fn render_server_config(iface: &Interface, modules: &[Module], users: &[UserVpn]) -> String {
    let prefix = network_prefix(&iface.network);
    let mut out = String::new();

    writeln!(out, "[Interface]").unwrap();
    writeln!(out, "PrivateKey = {}", iface.private_key).unwrap();
    writeln!(out, "Address = {}/{}", iface.server_ip, prefix).unwrap();
    writeln!(out, "ListenPort = {}", iface.listen_port).unwrap();
    if !iface.dns.is_empty() {
        writeln!(out, "DNS = {}", iface.dns).unwrap();
    }
    writeln!(out, "MTU = {}", iface.mtu).unwrap();
    if iface.save_config {
        writeln!(out, "SaveConfig = true").unwrap();
    }

    let post_up = iface
        .post_up
        .clone()
        .unwrap_or_else(|| default_post_up(iface));
    let post_down = iface
        .post_down
        .clone()
        .unwrap_or_else(|| default_post_down(iface));
    writeln!(out, "PostUp = {post_up}").unwrap();
    writeln!(out, "PostDown = {post_down}").unwrap();
    if let Some(pre_up) = &iface.pre_up {
        writeln!(out, "PreUp = {pre_up}").unwrap();
    }
    if let Some(pre_down) = &iface.pre_down {
        writeln!(out, "PreDown = {pre_down}").unwrap();
    }

    for module in modules {
        writeln!(out).unwrap();
        writeln!(out, "[Peer]").unwrap();
        writeln!(out, "# {} - {}", module.name, module.location).unwrap();
        writeln!(out, "PublicKey = {}", module.public_key).unwrap();
        if let Some(psk) = &module.preshared_key {
            writeln!(out, "PresharedKey = {psk}").unwrap();
        }
        writeln!(out, "AllowedIPs = {}", module_allowed_ips(module)).unwrap();
        if let Some(endpoint) = &module.endpoint {
            writeln!(out, "Endpoint = {endpoint}").unwrap();
        }
        if module.persistent_keepalive > 0 {
            writeln!(out, "PersistentKeepalive = {}", module.persistent_keepalive).unwrap();
        }
    }

    for user in users {
        writeln!(out).unwrap();
        writeln!(out, "[Peer]").unwrap();
        writeln!(out, "# user:{}", user.username).unwrap();
        writeln!(out, "PublicKey = {}", user.public_key).unwrap();
        writeln!(out, "PresharedKey = {}", user.preshared_key).unwrap();
        writeln!(out, "AllowedIPs = {}/32", user.ip_address).unwrap();
        if user.persistent_keepalive > 0 {
            writeln!(out, "PersistentKeepalive = {}", user.persistent_keepalive).unwrap();
        }
    }

    out
}

/// The `AllowedIPs` value of a module's peer block: its /32 tunnel address,
/// extended with its LAN subnets unless they are the placeholder default.
pub fn module_allowed_ips(module: &Module) -> String {
    let mut allowed = format!("{}/32", module.ip_address);
    if !module.allowed_ips.is_empty() && module.allowed_ips != DEFAULT_INTERNAL_NETWORK {
        write!(allowed, ", {}", module.allowed_ips).unwrap();
    }
    allowed
}

/// Render the client config a module downloads: SNAT from the tunnel
/// network to the module's LAN address plus FORWARD accepts, then the
/// server peer covering the tunnel network and the module's LAN.
pub fn render_module_client_config(
    module: &Module,
    iface: &Interface,
    server_endpoint: &str,
    dns: &str,
    local_ip: &str,
) -> String {
    let mut out = String::new();

    writeln!(out, "[Interface]").unwrap();
    writeln!(out, "PrivateKey = {}", module.private_key).unwrap();
    writeln!(out, "Address = {}/32", module.ip_address).unwrap();
    if !dns.is_empty() {
        writeln!(out, "DNS = {dns}").unwrap();
    }
    writeln!(
        out,
        "PostUp = iptables -t nat -A POSTROUTING -s {net} -j SNAT --to-source {local_ip}; \
         iptables -A FORWARD -i {wg} -j ACCEPT; iptables -A FORWARD -o {wg} -j ACCEPT",
        net = iface.network,
        wg = iface.name,
    )
    .unwrap();
    writeln!(
        out,
        "PostDown = iptables -t nat -D POSTROUTING -s {net} -j SNAT --to-source {local_ip}; \
         iptables -D FORWARD -i {wg} -j ACCEPT; iptables -D FORWARD -o {wg} -j ACCEPT",
        net = iface.network,
        wg = iface.name,
    )
    .unwrap();

    let mut allowed = iface.network.clone();
    if !module.allowed_ips.is_empty() {
        write!(allowed, ", {}", module.allowed_ips).unwrap();
    }

    writeln!(out).unwrap();
    writeln!(out, "[Peer]").unwrap();
    writeln!(out, "PublicKey = {}", iface.public_key).unwrap();
    writeln!(out, "Endpoint = {server_endpoint}").unwrap();
    writeln!(out, "AllowedIPs = {allowed}").unwrap();
    if let Some(psk) = &module.preshared_key {
        writeln!(out, "PresharedKey = {psk}").unwrap();
    }
    writeln!(out, "PersistentKeepalive = {}", module.persistent_keepalive).unwrap();

    out
}

/// Render the config an operator imports into their WireGuard client.
pub fn render_user_client_config(
    user: &UserVpn,
    iface: &Interface,
    server_endpoint: &str,
) -> String {
    let mut out = String::new();

    writeln!(out, "[Interface]").unwrap();
    writeln!(out, "PrivateKey = {}", user.private_key).unwrap();
    writeln!(out, "Address = {}/32", user.ip_address).unwrap();
    if !iface.dns.is_empty() {
        writeln!(out, "DNS = {}", iface.dns).unwrap();
    }

    writeln!(out).unwrap();
    writeln!(out, "[Peer]").unwrap();
    writeln!(out, "PublicKey = {}", iface.public_key).unwrap();
    writeln!(out, "PresharedKey = {}", user.preshared_key).unwrap();
    writeln!(out, "Endpoint = {server_endpoint}").unwrap();
    writeln!(out, "AllowedIPs = {}", user.allowed_ips).unwrap();
    writeln!(out, "PersistentKeepalive = {}", user.persistent_keepalive).unwrap();

    out
}

fn default_post_up(iface: &Interface) -> String {
    format!(
        "iptables -t nat -A POSTROUTING -s {net} -o {ext} -j MASQUERADE; \
         iptables -A INPUT -p udp -m udp --dport {port} -j ACCEPT; \
         iptables -A FORWARD -i {wg} -j ACCEPT; iptables -A FORWARD -o {wg} -j ACCEPT",
        net = iface.network,
        ext = iface.external_interface,
        port = iface.listen_port,
        wg = iface.name,
    )
}

fn default_post_down(iface: &Interface) -> String {
    format!(
        "iptables -t nat -D POSTROUTING -s {net} -o {ext} -j MASQUERADE; \
         iptables -D INPUT -p udp -m udp --dport {port} -j ACCEPT; \
         iptables -D FORWARD -i {wg} -j ACCEPT; iptables -D FORWARD -o {wg} -j ACCEPT",
        net = iface.network,
        ext = iface.external_interface,
        port = iface.listen_port,
        wg = iface.name,
    )
}

fn network_prefix(network: &str) -> &str {
    network.split_once('/').map(|(_, p)| p).unwrap_or("24")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::interfaces::InterfaceStatus;
    use crate::db::peers::{ModuleStatus, UserVpnStatus};
    use chrono::Utc;

    fn sample_interface() -> Interface {
        Interface {
            id: 1,
            name: "wg0".into(),
            description: "".into(),
            network: "10.10.0.0/24".into(),
            server_ip: "10.10.0.1".into(),
            listen_port: 51820,
            public_key: "SERVER-PUB".into(),
            private_key: "SERVER-PRIV".into(),
            status: InterfaceStatus::Down,
            max_peers: 100,
            dns: "8.8.8.8,8.8.4.4".into(),
            mtu: 1420,
            external_interface: "eth0".into(),
            pre_up: None,
            post_up: None,
            pre_down: None,
            post_down: None,
            save_config: true,
            total_peers: 0,
            active_peers: 0,
            total_traffic: 0,
            last_heartbeat: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_module(id: i64, ip: &str, allowed: &str) -> Module {
        Module {
            id,
            name: format!("edge-{id:02}"),
            location: "site".into(),
            description: "".into(),
            interface_id: 1,
            public_key: format!("MODULE-PUB-{id}"),
            private_key: format!("MODULE-PRIV-{id}"),
            preshared_key: Some(format!("MODULE-PSK-{id}")),
            ip_address: ip.into(),
            local_ip: None,
            status: ModuleStatus::Unconfigured,
            allowed_ips: allowed.into(),
            persistent_keepalive: 25,
            endpoint: None,
            api_key: "key".into(),
            total_rx_bytes: 0,
            total_tx_bytes: 0,
            latest_handshake: None,
            last_seen: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_user(id: i64, ip: &str) -> UserVpn {
        UserVpn {
            id,
            module_id: 1,
            username: format!("user{id}"),
            email: "".into(),
            description: "".into(),
            public_key: format!("USER-PUB-{id}"),
            private_key: format!("USER-PRIV-{id}"),
            preshared_key: format!("USER-PSK-{id}"),
            ip_address: ip.into(),
            status: UserVpnStatus::Offline,
            allowed_ips: "10.10.0.0/24".into(),
            persistent_keepalive: 25,
            is_active: true,
            max_devices: 1,
            expires_at: None,
            total_rx_bytes: 0,
            total_tx_bytes: 0,
            latest_handshake: None,
            last_seen: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn interface_block_layout() {
        let config = render_server_config(&sample_interface(), &[], &[]);
        let lines: Vec<&str> = config.lines().collect();

        assert_eq!(lines[0], "[Interface]");
        assert_eq!(lines[1], "PrivateKey = SERVER-PRIV");
        assert_eq!(lines[2], "Address = 10.10.0.1/24");
        assert_eq!(lines[3], "ListenPort = 51820");
        assert_eq!(lines[4], "DNS = 8.8.8.8,8.8.4.4");
        assert_eq!(lines[5], "MTU = 1420");
        assert_eq!(lines[6], "SaveConfig = true");
        assert!(lines[7].starts_with("PostUp = iptables -t nat -A POSTROUTING -s 10.10.0.0/24 -o eth0"));
        assert!(lines[8].starts_with("PostDown = iptables -t nat -D POSTROUTING"));
    }

    #[test]
    fn explicit_scripts_replace_defaults() {
        let mut iface = sample_interface();
        iface.post_up = Some("true".into());
        iface.post_down = Some("true".into());
        iface.pre_up = Some("echo pre".into());

        let config = render_server_config(&iface, &[], &[]);
        assert!(config.contains("PostUp = true\n"));
        assert!(config.contains("PostDown = true\n"));
        assert!(config.contains("PreUp = echo pre\n"));
        assert!(!config.contains("MASQUERADE"));
    }

    #[test]
    fn module_peer_block_includes_lan_subnets() {
        let module = sample_module(1, "10.10.0.2", "192.168.50.0/24");
        let config = render_server_config(&sample_interface(), &[module], &[]);

        assert!(config.contains("[Peer]\n# edge-01 - site\nPublicKey = MODULE-PUB-1\n"));
        assert!(config.contains("AllowedIPs = 10.10.0.2/32, 192.168.50.0/24\n"));
        assert!(config.contains("PresharedKey = MODULE-PSK-1\n"));
        assert!(config.contains("PersistentKeepalive = 25\n"));
    }

    #[test]
    fn placeholder_lan_is_not_emitted() {
        let module = sample_module(1, "10.10.0.2", DEFAULT_INTERNAL_NETWORK);
        let config = render_server_config(&sample_interface(), &[module], &[]);
        assert!(config.contains("AllowedIPs = 10.10.0.2/32\n"));
        assert!(!config.contains(DEFAULT_INTERNAL_NETWORK));
    }

    #[test]
    fn user_peer_blocks_follow_module_blocks() {
        let module = sample_module(1, "10.10.0.2", "192.168.50.0/24");
        let user = sample_user(1, "10.10.0.3");
        let config = render_server_config(&sample_interface(), &[module], &[user]);

        let module_pos = config.find("MODULE-PUB-1").unwrap();
        let user_pos = config.find("USER-PUB-1").unwrap();
        assert!(module_pos < user_pos);
        assert!(config.contains("# user:user1\n"));
        assert!(config.contains("AllowedIPs = 10.10.0.3/32\n"));
    }

    #[test]
    fn render_is_deterministic() {
        let iface = sample_interface();
        let modules = vec![
            sample_module(1, "10.10.0.2", "192.168.50.0/24"),
            sample_module(2, "10.10.0.3", "192.168.60.0/24"),
        ];
        let users = vec![sample_user(1, "10.10.0.4")];

        let first = render_server_config(&iface, &modules, &users);
        let second = render_server_config(&iface, &modules, &users);
        assert_eq!(first, second);
    }

    #[test]
    fn module_client_config_round_trips_through_the_parser() {
        let module = sample_module(1, "10.10.0.2", "192.168.50.0/24");
        let iface = sample_interface();
        let config = render_module_client_config(
            &module,
            &iface,
            "vpn.example.com:51820",
            "8.8.8.8,8.8.4.4",
            "192.168.50.1",
        );

        assert!(config.contains("Address = 10.10.0.2/32\n"));
        assert!(config.contains(
            "PostUp = iptables -t nat -A POSTROUTING -s 10.10.0.0/24 -j SNAT --to-source 192.168.50.1"
        ));
        assert!(config.contains("AllowedIPs = 10.10.0.0/24, 192.168.50.0/24\n"));

        let parsed = eitec_vpn_core::ini::parse_tunnel_config(&config).unwrap();
        assert_eq!(parsed.private_key, "MODULE-PRIV-1");
        assert_eq!(parsed.address, "10.10.0.2/32");
        assert_eq!(parsed.peer_public_key, "SERVER-PUB");
        assert_eq!(parsed.peer_endpoint.as_deref(), Some("vpn.example.com:51820"));
        assert_eq!(
            parsed.peer_allowed_ips.as_deref(),
            Some("10.10.0.0/24, 192.168.50.0/24")
        );

        // Emit → parse → emit is stable.
        let again = render_module_client_config(
            &module,
            &iface,
            "vpn.example.com:51820",
            "8.8.8.8,8.8.4.4",
            "192.168.50.1",
        );
        assert_eq!(config, again);
    }

    #[test]
    fn user_client_config_carries_the_derived_allowed_ips() {
        let user = sample_user(1, "10.10.0.3");
        let config = render_user_client_config(&user, &sample_interface(), "vpn.example.com:51820");

        assert!(config.contains("PrivateKey = USER-PRIV-1\n"));
        assert!(config.contains("Address = 10.10.0.3/32\n"));
        assert!(config.contains("PublicKey = SERVER-PUB\n"));
        assert!(config.contains("AllowedIPs = 10.10.0.0/24\n"));
        assert!(config.contains("PersistentKeepalive = 25\n"));
    }
}

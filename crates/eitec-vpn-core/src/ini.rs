//! Minimal parsing of client-side WireGuard configs.
//!
//! The tunnel driver needs just enough structure out of
//! `/etc/wireguard/<iface>.conf` to reproduce `wg-quick` by hand: the
//! interface key, address and MTU plus the single peer block. This is not a
//! general INI parser and does not try to be one.

#[derive(Debug, thiserror::Error)]
pub enum IniError {
    #[error("config is missing the [Interface] section")]
    MissingInterface,

    #[error("config is missing the [Peer] section")]
    MissingPeer,

    #[error("config is missing required field {0}")]
    MissingField(&'static str),
}

/// The fields of a client config the manual bring-up path needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TunnelConfig {
    pub private_key: String,
    pub address: String,
    pub mtu: Option<u32>,
    pub dns: Vec<String>,
    pub peer_public_key: String,
    pub peer_endpoint: Option<String>,
    pub peer_allowed_ips: Option<String>,
}

/// Parse the subset of a client config the tunnel driver uses.
pub fn parse_tunnel_config(content: &str) -> Result<TunnelConfig, IniError> {
    if !content.contains("[Interface]") {
        return Err(IniError::MissingInterface);
    }

    let mut config = TunnelConfig::default();
    let mut in_peer = false;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.eq_ignore_ascii_case("[peer]") {
            in_peer = true;
            continue;
        }
        if line.starts_with('[') {
            in_peer = false;
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match (in_peer, key) {
            (false, "PrivateKey") => config.private_key = value.to_string(),
            (false, "Address") => config.address = value.to_string(),
            (false, "MTU") => config.mtu = value.parse().ok(),
            (false, "DNS") => {
                config.dns = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            (true, "PublicKey") => config.peer_public_key = value.to_string(),
            (true, "Endpoint") => config.peer_endpoint = Some(value.to_string()),
            (true, "AllowedIPs") => config.peer_allowed_ips = Some(value.to_string()),
            _ => {}
        }
    }

    if config.private_key.is_empty() {
        return Err(IniError::MissingField("PrivateKey"));
    }
    if config.address.is_empty() {
        return Err(IniError::MissingField("Address"));
    }

    Ok(config)
}

/// Whether the config carries a `DNS =` line (the part that needs
/// `resolvconf` under `wg-quick`).
pub fn has_dns(content: &str) -> bool {
    content
        .lines()
        .any(|line| line.trim_start().starts_with("DNS"))
}

/// Copy of the config with every `DNS =` line removed, for hosts without
/// `resolvconf`.
pub fn strip_dns(content: &str) -> String {
    let mut out: String = content
        .lines()
        .filter(|line| !line.trim_start().starts_with("DNS"))
        .collect::<Vec<_>>()
        .join("\n");
    if content.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Structural validation of a pulled client config before it is written to
/// disk: both sections plus the fields the tunnel cannot come up without.
pub fn validate_client_config(content: &str) -> Result<(), IniError> {
    if !content.contains("[Interface]") {
        return Err(IniError::MissingInterface);
    }
    if !content.contains("[Peer]") {
        return Err(IniError::MissingPeer);
    }
    for field in ["PrivateKey", "Address", "PublicKey", "Endpoint"] {
        if !content.contains(field) {
            return Err(IniError::MissingField(field));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[Interface]
PrivateKey = cHJpdmF0ZS1rZXktcHJpdmF0ZS1rZXktcHJpdmF0ZT0=
Address = 10.10.0.2/32
DNS = 8.8.8.8, 8.8.4.4
MTU = 1420

[Peer]
PublicKey = cHVibGljLWtleS1wdWJsaWMta2V5LXB1YmxpYy1rZXk9
Endpoint = vpn.example.com:51820
AllowedIPs = 10.10.0.0/24, 192.168.50.0/24
PersistentKeepalive = 25
";

    #[test]
    fn parses_the_fields_manual_bring_up_needs() {
        let config = parse_tunnel_config(SAMPLE).unwrap();
        assert_eq!(
            config.private_key,
            "cHJpdmF0ZS1rZXktcHJpdmF0ZS1rZXktcHJpdmF0ZT0="
        );
        assert_eq!(config.address, "10.10.0.2/32");
        assert_eq!(config.mtu, Some(1420));
        assert_eq!(config.dns, vec!["8.8.8.8", "8.8.4.4"]);
        assert_eq!(
            config.peer_public_key,
            "cHVibGljLWtleS1wdWJsaWMta2V5LXB1YmxpYy1rZXk9"
        );
        assert_eq!(config.peer_endpoint.as_deref(), Some("vpn.example.com:51820"));
        assert_eq!(
            config.peer_allowed_ips.as_deref(),
            Some("10.10.0.0/24, 192.168.50.0/24")
        );
    }

    #[test]
    fn strip_dns_removes_only_dns_lines() {
        let stripped = strip_dns(SAMPLE);
        assert!(!stripped.contains("DNS"));
        assert!(stripped.contains("PrivateKey"));
        assert!(stripped.contains("PersistentKeepalive"));
        assert!(has_dns(SAMPLE));
        assert!(!has_dns(&stripped));
    }

    #[test]
    fn missing_interface_section_is_rejected() {
        assert!(matches!(
            parse_tunnel_config("PrivateKey = x\n"),
            Err(IniError::MissingInterface)
        ));
    }

    #[test]
    fn missing_private_key_is_rejected() {
        let err = parse_tunnel_config("[Interface]\nAddress = 10.0.0.2/32\n").unwrap_err();
        assert!(matches!(err, IniError::MissingField("PrivateKey")));
    }

    #[test]
    fn validate_requires_both_sections_and_core_fields() {
        assert!(validate_client_config(SAMPLE).is_ok());
        assert!(validate_client_config("[Interface]\nPrivateKey = x\nAddress = y\n").is_err());

        let no_endpoint = SAMPLE.replace("Endpoint", "Endpint");
        assert!(matches!(
            validate_client_config(&no_endpoint),
            Err(IniError::MissingField("Endpoint"))
        ));
    }
}

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

pub mod interfaces;
pub mod modules;
pub mod system;
pub mod users;

use crate::config::ServerConfig;
use crate::db::interfaces::Interface;
use crate::db::system::SystemConfigStore;

/// The endpoint a client config points at, picked in priority order:
/// the configured public server address, then the `server.endpoint`
/// system setting, then the well-known fallback host.
pub async fn resolve_endpoint(
    config: &ServerConfig,
    system: &SystemConfigStore,
    iface: &Interface,
) -> String {
    if !config.app.server_ip.is_empty() {
        return format!("{}:{}", config.app.server_ip, iface.listen_port);
    }
    if let Ok(Some(endpoint)) = system.get("server.endpoint").await {
        if !endpoint.is_empty() {
            return endpoint;
        }
    }
    format!("vpn.eitec.com:{}", iface.listen_port)
}

pub(crate) fn redact(key: &str) -> String {
    if key.len() > 8 {
        format!("{}…", &key[..8])
    } else {
        "…".into()
    }
}

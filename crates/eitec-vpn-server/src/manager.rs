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

//! Interface lifecycle: creation with pool population, config rebuilds,
//! start/stop through `wg-quick`, and deletion.
//!
//! The manager is the only writer of `/etc/wireguard/<iface>.conf`; every
//! state-changing operation holds the per-interface lock for its duration.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use ipnetwork::Ipv4Network;
use sqlx::SqlitePool;
use tracing::{debug, info};

use eitec_vpn_core::command::{
    CommandError, CommandRunner, WG_QUICK_DOWN_TIMEOUT, WG_QUICK_UP_TIMEOUT,
};
use eitec_vpn_core::keys::KeyPair;

use crate::db::interfaces::{Interface, InterfaceStatus, InterfaceStore, NewInterface};
use crate::db::peers::PeerStore;
use crate::db::pool::AddressPool;
use crate::error::VpnError;
use crate::locks::InterfaceLocks;
use crate::render;

/// Caller-supplied parameters for a new interface.
#[derive(Debug, Clone)]
pub struct InterfaceTemplate {
    pub name: String,
    pub description: String,
    pub network: String,
    pub listen_port: i64,
    pub max_peers: i64,
    pub dns: String,
    pub mtu: i64,
    pub external_interface: String,
    pub pre_up: Option<String>,
    pub post_up: Option<String>,
    pub pre_down: Option<String>,
    pub post_down: Option<String>,
    pub save_config: bool,
}

pub struct InterfaceManager {
    db: SqlitePool,
    interfaces: InterfaceStore,
    peers: PeerStore,
    pool: AddressPool,
    runner: CommandRunner,
    locks: InterfaceLocks,
    config_dir: PathBuf,
}

impl InterfaceManager {
    pub fn new(
        db: SqlitePool,
        runner: CommandRunner,
        locks: InterfaceLocks,
        config_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            interfaces: InterfaceStore::new(db.clone()),
            peers: PeerStore::new(db.clone()),
            pool: AddressPool::new(db.clone()),
            db,
            runner,
            locks,
            config_dir: config_dir.into(),
        }
    }

    pub fn store(&self) -> &InterfaceStore {
        &self.interfaces
    }

    pub fn config_path(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("{name}.conf"))
    }

    // -- Creation ------------------------------------------------------------

    /// Validate the template, generate the server keypair, persist the row
    /// and populate its address pool; all in one transaction. No config
    /// file is written yet.
    pub async fn create(&self, template: InterfaceTemplate) -> Result<Interface, VpnError> {
        let network = self.validate_template(&template).await?;

        let server_ip = Ipv4Addr::from(u32::from(network.network()) + 1);
        let keypair = KeyPair::generate();

        let new = NewInterface {
            name: template.name,
            description: template.description,
            network: network.to_string(),
            server_ip: server_ip.to_string(),
            listen_port: template.listen_port,
            public_key: keypair.public_key,
            private_key: keypair.private_key,
            max_peers: template.max_peers,
            dns: template.dns,
            mtu: template.mtu,
            external_interface: template.external_interface,
            pre_up: template.pre_up,
            post_up: template.post_up,
            pre_down: template.pre_down,
            post_down: template.post_down,
            save_config: template.save_config,
        };

        let mut tx = self.db.begin().await.map_err(crate::db::StoreError::from)?;
        let iface = self.interfaces.insert(&mut tx, &new).await?;
        let pool_size = self.pool.populate(&mut tx, network, server_ip).await?;
        tx.commit().await.map_err(crate::db::StoreError::from)?;

        info!(
            interface = %iface.name,
            network = %iface.network,
            server_ip = %iface.server_ip,
            pool_size,
            "interface created"
        );
        Ok(iface)
    }

    async fn validate_template(
        &self,
        template: &InterfaceTemplate,
    ) -> Result<Ipv4Network, VpnError> {
        if !is_valid_interface_name(&template.name) {
            return Err(VpnError::Validation(format!(
                "interface name {:?} must match wg<N>",
                template.name
            )));
        }
        if self.interfaces.find_by_name(&template.name).await?.is_some() {
            return Err(VpnError::Validation(format!(
                "interface name {:?} is already in use",
                template.name
            )));
        }

        if !(1024..=65535).contains(&template.listen_port) {
            return Err(VpnError::Validation(
                "listen port must be between 1024 and 65535".into(),
            ));
        }
        if self
            .interfaces
            .find_by_port(template.listen_port)
            .await?
            .is_some()
        {
            return Err(VpnError::Validation(format!(
                "listen port {} is already in use",
                template.listen_port
            )));
        }

        let network: Ipv4Network = template
            .network
            .parse()
            .map_err(|_| VpnError::Validation(format!("invalid network {:?}", template.network)))?;
        if network.network() != network.ip() {
            return Err(VpnError::Validation(format!(
                "{} is not a network address",
                template.network
            )));
        }
        if !network.ip().is_private() {
            return Err(VpnError::Validation(
                "tunnel network must be a private range".into(),
            ));
        }
        if network.prefix() > 30 {
            return Err(VpnError::Validation(format!(
                "network /{} has no allocatable host addresses",
                network.prefix()
            )));
        }
        if self
            .interfaces
            .find_by_network(&network.to_string())
            .await?
            .is_some()
        {
            return Err(VpnError::Validation(format!(
                "network {network} is already in use"
            )));
        }

        if !(1280..=1500).contains(&template.mtu) {
            return Err(VpnError::Validation(
                "mtu must be between 1280 and 1500".into(),
            ));
        }
        if template.max_peers <= 0 {
            return Err(VpnError::Validation("max_peers must be positive".into()));
        }
        if template.external_interface.trim().is_empty() {
            return Err(VpnError::Validation(
                "external_interface is required for NAT rule generation".into(),
            ));
        }

        Ok(network)
    }

    // -- Reads ---------------------------------------------------------------

    pub async fn get(&self, id: i64) -> Result<Interface, VpnError> {
        self.interfaces.get(id).await.map_err(|e| match e {
            crate::db::StoreError::NotFound => VpnError::InterfaceNotFound,
            other => other.into(),
        })
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Interface, VpnError> {
        self.interfaces.get_by_name(name).await.map_err(|e| match e {
            crate::db::StoreError::NotFound => VpnError::InterfaceNotFound,
            other => other.into(),
        })
    }

    pub async fn list(&self) -> Result<Vec<Interface>, VpnError> {
        Ok(self.interfaces.list().await?)
    }

    /// Render the canonical config for the interface's current model.
    pub async fn render_config(&self, id: i64) -> Result<String, VpnError> {
        let iface = self.get(id).await?;
        let modules = self.peers.modules_by_interface(id).await?;
        let users = self.peers.active_users_by_interface(id).await?;
        Ok(render::render_server_config(&iface, &modules, &users))
    }

    // -- Rebuild -------------------------------------------------------------

    /// Re-render the config and, when it differs from disk, write it
    /// atomically. A running interface is cycled to pick the change up.
    /// Returns whether a write happened.
    pub async fn rebuild(&self, id: i64) -> Result<bool, VpnError> {
        let _guard = self.locks.lock(id).await;
        self.rebuild_locked(id).await
    }

    pub(crate) async fn rebuild_locked(&self, id: i64) -> Result<bool, VpnError> {
        let iface = self.get(id).await?;
        let rendered = self.render_config(id).await?;
        let path = self.config_path(&iface.name);

        let on_disk = match tokio::fs::read_to_string(&path).await {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        if on_disk.as_deref() == Some(rendered.as_str()) {
            debug!(interface = %iface.name, "config unchanged, skipping write");
            return Ok(false);
        }

        write_config_atomic(&path, &rendered).await?;
        info!(interface = %iface.name, path = %path.display(), "config rewritten");

        // A running interface is cycled through the real state machine so a
        // failed reload settles into Error, not a half-applied tunnel.
        if iface.status == InterfaceStatus::Up {
            self.stop_locked(id).await?;
            self.start_locked(id).await?;
            info!(interface = %iface.name, "interface reloaded");
        }
        Ok(true)
    }

    // -- Start / stop --------------------------------------------------------

    pub async fn start(&self, id: i64) -> Result<Interface, VpnError> {
        let _guard = self.locks.lock(id).await;
        self.start_locked(id).await
    }

    async fn start_locked(&self, id: i64) -> Result<Interface, VpnError> {
        let iface = self.get(id).await?;
        if iface.status.is_running() {
            return Err(VpnError::StateConflict(format!(
                "interface {} is already running",
                iface.name
            )));
        }

        self.interfaces.set_status(id, InterfaceStatus::Starting).await?;

        let path = self.config_path(&iface.name);
        if !path.exists() {
            let rendered = self.render_config(id).await?;
            write_config_atomic(&path, &rendered).await?;
            debug!(interface = %iface.name, "config written before first start");
        }

        match self.wg_quick_up(&iface).await {
            Ok(()) => {
                self.interfaces.set_status(id, InterfaceStatus::Up).await?;
                info!(interface = %iface.name, "interface started");
                self.get(id).await
            }
            Err(e) => {
                self.interfaces.set_status(id, InterfaceStatus::Error).await?;
                Err(e)
            }
        }
    }

    pub async fn stop(&self, id: i64) -> Result<Interface, VpnError> {
        let _guard = self.locks.lock(id).await;
        self.stop_locked(id).await
    }

    async fn stop_locked(&self, id: i64) -> Result<Interface, VpnError> {
        let iface = self.get(id).await?;
        if iface.status == InterfaceStatus::Down {
            return Ok(iface);
        }

        self.interfaces.set_status(id, InterfaceStatus::Stopping).await?;

        match self.wg_quick_down(&iface).await {
            Ok(()) => {
                self.interfaces.set_status(id, InterfaceStatus::Down).await?;
                info!(interface = %iface.name, "interface stopped");
                self.get(id).await
            }
            Err(e) => {
                self.interfaces.set_status(id, InterfaceStatus::Error).await?;
                Err(e)
            }
        }
    }

    async fn wg_quick_up(&self, iface: &Interface) -> Result<(), VpnError> {
        match self
            .runner
            .run("wg-quick", &["up", &iface.name], WG_QUICK_UP_TIMEOUT)
            .await
        {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(VpnError::CommandFailed {
                output: output.combined(),
            }),
            Err(CommandError::Timeout { command, timeout }) => {
                // Clean up whatever wg-quick left behind before reporting.
                self.runner
                    .force_cleanup(&iface.name, &iface.external_interface)
                    .await;
                Err(VpnError::Command(CommandError::Timeout { command, timeout }))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn wg_quick_down(&self, iface: &Interface) -> Result<(), VpnError> {
        match self
            .runner
            .run("wg-quick", &["down", &iface.name], WG_QUICK_DOWN_TIMEOUT)
            .await
        {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => {
                let combined = output.combined();
                // A vanished interface is a successful stop.
                if combined.contains("does not exist")
                    || combined.contains("is not a WireGuard interface")
                {
                    return Ok(());
                }
                Err(VpnError::CommandFailed { output: combined })
            }
            Err(CommandError::Timeout { command, timeout }) => {
                self.runner
                    .force_cleanup(&iface.name, &iface.external_interface)
                    .await;
                Err(VpnError::Command(CommandError::Timeout { command, timeout }))
            }
            Err(e) => Err(e.into()),
        }
    }

    // -- Deletion ------------------------------------------------------------

    /// Remove an interface with no peers left: stop it if running, delete
    /// the config file, drop the address pool and the row.
    pub async fn delete(&self, id: i64) -> Result<(), VpnError> {
        let _guard = self.locks.lock(id).await;

        let iface = self.get(id).await?;

        let mut conn = self.db.acquire().await.map_err(crate::db::StoreError::from)?;
        let module_count = self.peers.module_count(&mut conn, id).await?;
        let user_count = self.peers.active_user_count(&mut conn, id).await?;
        drop(conn);
        if module_count > 0 || user_count > 0 {
            return Err(VpnError::StateConflict(format!(
                "interface {} still has {} peer(s); delete them first",
                iface.name,
                module_count + user_count
            )));
        }

        if iface.status == InterfaceStatus::Up {
            self.stop_locked(id).await?;
        }

        let path = self.config_path(&iface.name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(interface = %iface.name, "config file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut tx = self.db.begin().await.map_err(crate::db::StoreError::from)?;
        self.pool.drop_network(&mut tx, &iface.network).await?;
        self.interfaces.delete(&mut tx, id).await?;
        tx.commit().await.map_err(crate::db::StoreError::from)?;

        info!(interface = %iface.name, "interface deleted");
        Ok(())
    }
}

/// `wgN` only: the kernel name space this control plane owns.
pub fn is_valid_interface_name(name: &str) -> bool {
    name.strip_prefix("wg")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

/// Write to `<path>.tmp` then rename into place, mode 0600.
async fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("conf.tmp");
    tokio::fs::write(&tmp, content).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
    }

    tokio::fs::rename(&tmp, path).await
}

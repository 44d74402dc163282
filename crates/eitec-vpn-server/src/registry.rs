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

//! Peer registry: module and user-VPN lifecycle.
//!
//! Every create runs its validation, row insert and address-pool claim in
//! one transaction; a failure anywhere rolls the whole thing back. A
//! successful mutation triggers an interface config rebuild afterwards.

use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ipnetwork::Ipv4Network;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use eitec_vpn_core::keys::{generate_preshared_key, validate_key, KeyPair};

use crate::db::interfaces::Interface;
use crate::db::peers::{Module, ModuleStatus, NewModule, NewUserVpn, PeerStore, UserVpn};
use crate::db::pool::{AddressPool, PeerKind};
use crate::db::StoreError;
use crate::error::VpnError;
use crate::locks::InterfaceLocks;
use crate::manager::InterfaceManager;
use crate::render::DEFAULT_INTERNAL_NETWORK;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateModuleRequest {
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub description: String,
    pub interface_id: i64,
    pub allowed_ips: String,
    #[serde(default)]
    pub local_ip: Option<String>,
    #[serde(default)]
    pub persistent_keepalive: Option<i64>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub auto_generate_keys: bool,
    #[serde(default)]
    pub auto_assign_ip: bool,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateUserVpnRequest {
    pub module_id: i64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub allowed_ips: Option<String>,
    #[serde(default)]
    pub max_devices: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct UpdateModuleRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub allowed_ips: Option<String>,
    #[serde(default)]
    pub local_ip: Option<String>,
    #[serde(default)]
    pub persistent_keepalive: Option<i64>,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct UpdateUserVpnRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub allowed_ips: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub max_devices: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct PeerRegistry {
    db: SqlitePool,
    peers: PeerStore,
    pool: AddressPool,
    manager: Arc<InterfaceManager>,
    locks: InterfaceLocks,
}

impl PeerRegistry {
    pub fn new(db: SqlitePool, manager: Arc<InterfaceManager>, locks: InterfaceLocks) -> Self {
        Self {
            peers: PeerStore::new(db.clone()),
            pool: AddressPool::new(db.clone()),
            db,
            manager,
            locks,
        }
    }

    pub fn peers(&self) -> &PeerStore {
        &self.peers
    }

    // -- Module lifecycle ----------------------------------------------------

    pub async fn create_module(&self, request: CreateModuleRequest) -> Result<Module, VpnError> {
        validate_allowed_ips(&request.allowed_ips)?;
        let keepalive = request.persistent_keepalive.unwrap_or(25);
        if !(0..=300).contains(&keepalive) {
            return Err(VpnError::Validation(
                "persistent_keepalive must be between 0 and 300 seconds".into(),
            ));
        }
        if request.name.trim().is_empty() {
            return Err(VpnError::Validation("module name is required".into()));
        }
        if request.location.trim().is_empty() {
            return Err(VpnError::Validation("module location is required".into()));
        }

        let keypair = if request.auto_generate_keys {
            KeyPair::generate()
        } else {
            let private_key = request
                .private_key
                .clone()
                .ok_or_else(|| VpnError::Validation("private_key is required when auto_generate_keys is off".into()))?;
            let public_key = request
                .public_key
                .clone()
                .ok_or_else(|| VpnError::Validation("public_key is required when auto_generate_keys is off".into()))?;
            if !validate_key(&private_key) || !validate_key(&public_key) {
                return Err(VpnError::Validation(
                    "keys must be 44-character base64 strings encoding 32 bytes".into(),
                ));
            }
            KeyPair {
                private_key,
                public_key,
            }
        };

        let local_ip = request
            .local_ip
            .clone()
            .filter(|ip| !ip.is_empty())
            .or_else(|| infer_local_ip(&request.allowed_ips));

        let guard = self.locks.lock(request.interface_id).await;
        let module = {
            let mut tx = self.db.begin().await.map_err(StoreError::from)?;

            let iface = self.fetch_mutable_interface(&mut tx, request.interface_id).await?;
            self.check_capacity(&mut tx, &iface).await?;

            if self
                .peers
                .find_module_by_name(&mut tx, &request.name)
                .await?
                .is_some()
            {
                return Err(VpnError::Validation(format!(
                    "module name {:?} is already in use",
                    request.name
                )));
            }
            if self.peers.public_key_in_use(&mut tx, &keypair.public_key).await? {
                return Err(VpnError::Validation(
                    "public key is already assigned to another peer".into(),
                ));
            }

            let new = NewModule {
                name: request.name.clone(),
                location: request.location.clone(),
                description: request.description.clone(),
                interface_id: iface.id,
                public_key: keypair.public_key.clone(),
                private_key: keypair.private_key.clone(),
                preshared_key: Some(generate_preshared_key()),
                ip_address: self
                    .resolve_address(&mut tx, &iface, request.auto_assign_ip, request.ip_address.as_deref())
                    .await?,
                local_ip,
                allowed_ips: request.allowed_ips.clone(),
                persistent_keepalive: keepalive,
                endpoint: request.endpoint.clone(),
                api_key: Uuid::new_v4().to_string(),
            };

            let module = self.peers.insert_module(&mut tx, &new).await?;
            self.pool
                .claim(&mut tx, &iface.network, &module.ip_address, module.id, PeerKind::Module)
                .await
                .map_err(|e| match e {
                    // The address was picked inside this transaction, so a
                    // failed claim means it was handed to someone else.
                    StoreError::AddressUnavailable { address } => {
                        VpnError::Validation(format!("address {address} is already in use"))
                    }
                    other => other.into(),
                })?;

            tx.commit().await.map_err(StoreError::from)?;
            module
        };
        drop(guard);

        info!(
            module = %module.name,
            ip = %module.ip_address,
            allowed_ips = %module.allowed_ips,
            "module created"
        );
        self.rebuild_after_mutation(module.interface_id).await;
        Ok(self.peers.get_module(module.id).await?)
    }

    async fn resolve_address(
        &self,
        tx: &mut sqlx::SqliteConnection,
        iface: &Interface,
        auto_assign: bool,
        requested: Option<&str>,
    ) -> Result<String, VpnError> {
        if auto_assign {
            // Peer id is bound right after the insert; reserve with a
            // placeholder claim only when the row id exists. Here we only
            // pick the address; the claim happens post-insert.
            let entry = sqlx::query_as::<_, (String,)>(
                "SELECT ip_address FROM address_pool
                 WHERE network = ? AND is_used = 0 ORDER BY id LIMIT 1",
            )
            .bind(&iface.network)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::from)?
            .ok_or(StoreError::PoolExhausted {
                network: iface.network.clone(),
            })?;
            Ok(entry.0)
        } else {
            let address = requested
                .filter(|a| !a.is_empty())
                .ok_or_else(|| VpnError::Validation("ip_address is required when auto_assign_ip is off".into()))?;
            let ip: Ipv4Addr = address
                .parse()
                .map_err(|_| VpnError::Validation(format!("invalid ip address {address:?}")))?;
            let network: Ipv4Network = iface
                .network
                .parse()
                .map_err(|_| VpnError::Validation(format!("interface has invalid network {:?}", iface.network)))?;
            if !network.contains(ip) {
                return Err(VpnError::Validation(format!(
                    "{address} is outside the tunnel network {}",
                    iface.network
                )));
            }
            Ok(address.to_string())
        }
    }

    pub async fn update_module(
        &self,
        id: i64,
        request: UpdateModuleRequest,
    ) -> Result<Module, VpnError> {
        let module = self.get_module(id).await?;

        let name = request.name.unwrap_or_else(|| module.name.clone());
        let location = request.location.unwrap_or_else(|| module.location.clone());
        let description = request.description.unwrap_or_else(|| module.description.clone());
        let allowed_ips = request.allowed_ips.unwrap_or_else(|| module.allowed_ips.clone());
        let local_ip = request.local_ip.or_else(|| module.local_ip.clone());
        let keepalive = request.persistent_keepalive.unwrap_or(module.persistent_keepalive);
        let endpoint = request.endpoint.or_else(|| module.endpoint.clone());

        validate_allowed_ips(&allowed_ips)?;
        if !(0..=300).contains(&keepalive) {
            return Err(VpnError::Validation(
                "persistent_keepalive must be between 0 and 300 seconds".into(),
            ));
        }

        let config_changed = allowed_ips != module.allowed_ips
            || keepalive != module.persistent_keepalive
            || endpoint != module.endpoint;

        let guard = self.locks.lock(module.interface_id).await;
        {
            let mut tx = self.db.begin().await.map_err(StoreError::from)?;
            if config_changed {
                self.fetch_mutable_interface(&mut tx, module.interface_id).await?;
            }
            if name != module.name {
                if let Some(other) = self.peers.find_module_by_name(&mut tx, &name).await? {
                    if other.id != id {
                        return Err(VpnError::Validation(format!(
                            "module name {name:?} is already in use"
                        )));
                    }
                }
            }
            tx.commit().await.map_err(StoreError::from)?;
        }

        self.peers
            .update_module_fields(
                id,
                &name,
                &location,
                &description,
                &allowed_ips,
                local_ip.as_deref(),
                keepalive,
                endpoint.as_deref(),
            )
            .await?;
        drop(guard);

        if config_changed {
            self.rebuild_after_mutation(module.interface_id).await;
        }
        Ok(self.peers.get_module(id).await?)
    }

    /// Fresh keypair, status back to unconfigured, config rebuilt. The
    /// module's address is retained.
    pub async fn regenerate_module_keys(&self, id: i64) -> Result<Module, VpnError> {
        let module = self.get_module(id).await?;

        let guard = self.locks.lock(module.interface_id).await;
        {
            let mut tx = self.db.begin().await.map_err(StoreError::from)?;
            self.fetch_mutable_interface(&mut tx, module.interface_id).await?;
            tx.commit().await.map_err(StoreError::from)?;
        }

        let keypair = KeyPair::generate();
        self.peers
            .set_module_keys(id, &keypair.public_key, &keypair.private_key, ModuleStatus::Unconfigured)
            .await?;
        drop(guard);

        info!(module = %module.name, "module keys regenerated");
        self.rebuild_after_mutation(module.interface_id).await;
        Ok(self.peers.get_module(id).await?)
    }

    pub async fn delete_module(&self, id: i64) -> Result<(), VpnError> {
        let module = self.get_module(id).await?;

        let guard = self.locks.lock(module.interface_id).await;
        {
            let mut tx = self.db.begin().await.map_err(StoreError::from)?;
            let iface = self.fetch_mutable_interface(&mut tx, module.interface_id).await?;

            let (user_count,): (i64,) =
                sqlx::query_as("SELECT COUNT(*) FROM user_vpns WHERE module_id = ?")
                    .bind(id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(StoreError::from)?;
            if user_count > 0 {
                return Err(VpnError::StateConflict(format!(
                    "module {} still has {user_count} user vpn(s); delete them first",
                    module.name
                )));
            }

            self.pool.release(&mut tx, &iface.network, &module.ip_address).await?;
            self.peers.delete_module(&mut tx, id).await?;
            tx.commit().await.map_err(StoreError::from)?;
        }
        drop(guard);

        info!(module = %module.name, ip = %module.ip_address, "module deleted");
        self.rebuild_after_mutation(module.interface_id).await;
        Ok(())
    }

    pub async fn get_module(&self, id: i64) -> Result<Module, VpnError> {
        self.peers.get_module(id).await.map_err(|e| match e {
            StoreError::NotFound => VpnError::ModuleNotFound,
            other => other.into(),
        })
    }

    // -- User VPN lifecycle --------------------------------------------------

    pub async fn create_user_vpn(&self, request: CreateUserVpnRequest) -> Result<UserVpn, VpnError> {
        if request.username.trim().is_empty() {
            return Err(VpnError::Validation("username is required".into()));
        }
        let max_devices = request.max_devices.unwrap_or(1).max(1);

        let module = self.get_module(request.module_id).await?;

        let guard = self.locks.lock(module.interface_id).await;
        let user = {
            let mut tx = self.db.begin().await.map_err(StoreError::from)?;

            let iface = self.fetch_mutable_interface(&mut tx, module.interface_id).await?;
            self.check_capacity(&mut tx, &iface).await?;

            if self
                .peers
                .find_user_by_name(&mut tx, module.id, &request.username)
                .await?
                .is_some()
            {
                return Err(VpnError::Validation(format!(
                    "username {:?} already exists on module {}",
                    request.username, module.name
                )));
            }

            let keypair = KeyPair::generate();
            let allowed_ips = derive_user_allowed_ips(
                request.allowed_ips.as_deref(),
                &iface.network,
                &module.allowed_ips,
            );

            let address = sqlx::query_as::<_, (String,)>(
                "SELECT ip_address FROM address_pool
                 WHERE network = ? AND is_used = 0 ORDER BY id LIMIT 1",
            )
            .bind(&iface.network)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::from)?
            .ok_or(StoreError::PoolExhausted {
                network: iface.network.clone(),
            })?
            .0;

            let new = NewUserVpn {
                module_id: module.id,
                username: request.username.clone(),
                email: request.email.clone(),
                description: request.description.clone(),
                public_key: keypair.public_key,
                private_key: keypair.private_key,
                preshared_key: generate_preshared_key(),
                ip_address: address,
                allowed_ips,
                persistent_keepalive: 25,
                max_devices,
                expires_at: request.expires_at,
            };

            let user = self.peers.insert_user(&mut tx, &new).await?;
            self.pool
                .claim(&mut tx, &iface.network, &user.ip_address, user.id, PeerKind::User)
                .await?;

            tx.commit().await.map_err(StoreError::from)?;
            user
        };
        drop(guard);

        info!(
            username = %user.username,
            module_id = user.module_id,
            ip = %user.ip_address,
            allowed_ips = %user.allowed_ips,
            "user vpn created"
        );
        self.rebuild_after_mutation(module.interface_id).await;
        Ok(self.peers.get_user(user.id).await?)
    }

    pub async fn update_user_vpn(
        &self,
        id: i64,
        request: UpdateUserVpnRequest,
    ) -> Result<UserVpn, VpnError> {
        let user = self.get_user(id).await?;
        let module = self.get_module(user.module_id).await?;

        let email = request.email.unwrap_or_else(|| user.email.clone());
        let description = request.description.unwrap_or_else(|| user.description.clone());
        let allowed_ips = request.allowed_ips.unwrap_or_else(|| user.allowed_ips.clone());
        let is_active = request.is_active.unwrap_or(user.is_active);
        let max_devices = request.max_devices.unwrap_or(user.max_devices).max(1);
        let expires_at = request.expires_at.or(user.expires_at);

        validate_allowed_ips(&allowed_ips)?;

        let config_changed = is_active != user.is_active || allowed_ips != user.allowed_ips;

        let guard = self.locks.lock(module.interface_id).await;
        if config_changed {
            let mut tx = self.db.begin().await.map_err(StoreError::from)?;
            self.fetch_mutable_interface(&mut tx, module.interface_id).await?;
            tx.commit().await.map_err(StoreError::from)?;
        }
        self.peers
            .update_user_fields(id, &email, &description, &allowed_ips, is_active, max_devices, expires_at)
            .await?;
        drop(guard);

        if config_changed {
            self.rebuild_after_mutation(module.interface_id).await;
        }
        Ok(self.peers.get_user(id).await?)
    }

    pub async fn regenerate_user_keys(&self, id: i64) -> Result<UserVpn, VpnError> {
        let user = self.get_user(id).await?;
        let module = self.get_module(user.module_id).await?;

        let guard = self.locks.lock(module.interface_id).await;
        {
            let mut tx = self.db.begin().await.map_err(StoreError::from)?;
            self.fetch_mutable_interface(&mut tx, module.interface_id).await?;
            tx.commit().await.map_err(StoreError::from)?;
        }

        let keypair = KeyPair::generate();
        self.peers
            .set_user_keys(id, &keypair.public_key, &keypair.private_key, &generate_preshared_key())
            .await?;
        drop(guard);

        self.rebuild_after_mutation(module.interface_id).await;
        Ok(self.peers.get_user(id).await?)
    }

    pub async fn delete_user_vpn(&self, id: i64) -> Result<(), VpnError> {
        let user = self.get_user(id).await?;
        let module = self.get_module(user.module_id).await?;

        let guard = self.locks.lock(module.interface_id).await;
        {
            let mut tx = self.db.begin().await.map_err(StoreError::from)?;
            let iface = self.fetch_mutable_interface(&mut tx, module.interface_id).await?;
            self.pool.release(&mut tx, &iface.network, &user.ip_address).await?;
            self.peers.delete_user(&mut tx, id).await?;
            tx.commit().await.map_err(StoreError::from)?;
        }
        drop(guard);

        info!(username = %user.username, ip = %user.ip_address, "user vpn deleted");
        self.rebuild_after_mutation(module.interface_id).await;
        Ok(())
    }

    pub async fn get_user(&self, id: i64) -> Result<UserVpn, VpnError> {
        self.peers.get_user(id).await.map_err(|e| match e {
            StoreError::NotFound => VpnError::UserNotFound,
            other => other.into(),
        })
    }

    // -- Shared checks -------------------------------------------------------

    /// Load the interface and refuse the mutation while the kernel device
    /// may be live; the operator has to stop it first so the database and
    /// the running tunnel cannot diverge silently.
    async fn fetch_mutable_interface(
        &self,
        tx: &mut sqlx::SqliteConnection,
        interface_id: i64,
    ) -> Result<Interface, VpnError> {
        let iface = sqlx::query_as::<_, Interface>("SELECT * FROM interfaces WHERE id = ?")
            .bind(interface_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(StoreError::from)?
            .ok_or(VpnError::InterfaceNotFound)?;

        if iface.status.is_running() {
            return Err(VpnError::StateConflict(format!(
                "interface {} is {}; stop it before changing its peers",
                iface.name,
                iface.status.as_str()
            )));
        }
        Ok(iface)
    }

    async fn check_capacity(
        &self,
        tx: &mut sqlx::SqliteConnection,
        iface: &Interface,
    ) -> Result<(), VpnError> {
        let modules = self.peers.module_count(tx, iface.id).await?;
        let users = self.peers.active_user_count(tx, iface.id).await?;
        if modules + users >= iface.max_peers {
            return Err(VpnError::Capacity(format!(
                "interface {} is at its peer limit ({}/{})",
                iface.name,
                modules + users,
                iface.max_peers
            )));
        }
        Ok(())
    }

    async fn rebuild_after_mutation(&self, interface_id: i64) {
        if let Err(e) = self.manager.rebuild(interface_id).await {
            // The row change already committed; the next rebuild (or start)
            // re-renders from the same model.
            warn!(interface_id, error = %e, "config rebuild after peer mutation failed");
        }
    }
}

// -- Pure derivations --------------------------------------------------------

/// AllowedIPs granted to a new user when the caller supplied none (or the
/// catch-all placeholder): the tunnel network, extended with the parent
/// module's LAN when it is a real one.
pub fn derive_user_allowed_ips(
    requested: Option<&str>,
    interface_network: &str,
    module_allowed_ips: &str,
) -> String {
    match requested {
        Some(value) if !value.is_empty() && value != "0.0.0.0/0" => value.to_string(),
        _ => {
            let mut allowed = interface_network.to_string();
            if !module_allowed_ips.is_empty() && module_allowed_ips != DEFAULT_INTERNAL_NETWORK {
                allowed.push_str(", ");
                allowed.push_str(module_allowed_ips);
            }
            allowed
        }
    }
}

/// Guess the module's LAN-side gateway address from its first private
/// subnet: the network address plus one.
pub fn infer_local_ip(allowed_ips: &str) -> Option<String> {
    for entry in allowed_ips.split(',') {
        let entry = entry.trim();
        if entry == "0.0.0.0/0" {
            continue;
        }
        let Ok(network) = entry.parse::<Ipv4Network>() else {
            continue;
        };
        if !network.ip().is_private() {
            continue;
        }
        let gateway = Ipv4Addr::from(u32::from(network.network()) + 1);
        return Some(gateway.to_string());
    }
    None
}

/// Comma-separated CIDR list; `0.0.0.0/0` is accepted as-is.
pub fn validate_allowed_ips(allowed_ips: &str) -> Result<(), VpnError> {
    if allowed_ips.trim().is_empty() {
        return Err(VpnError::Validation("allowed_ips is required".into()));
    }
    for entry in allowed_ips.split(',') {
        let entry = entry.trim();
        if entry == "0.0.0.0/0" {
            continue;
        }
        if entry.parse::<Ipv4Network>().is_err() {
            return Err(VpnError::Validation(format!(
                "invalid CIDR {entry:?} in allowed_ips"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(None, "10.10.0.0/24", "192.168.50.0/24", "10.10.0.0/24, 192.168.50.0/24" ; "default extends with module lan")]
    #[test_case(None, "10.10.0.0/24", DEFAULT_INTERNAL_NETWORK, "10.10.0.0/24" ; "placeholder lan is dropped")]
    #[test_case(None, "10.10.0.0/24", "", "10.10.0.0/24" ; "no module lan")]
    #[test_case(Some("0.0.0.0/0"), "10.10.0.0/24", "192.168.50.0/24", "10.10.0.0/24, 192.168.50.0/24" ; "catch all is replaced by derivation")]
    #[test_case(Some("172.16.4.0/22"), "10.10.0.0/24", "192.168.50.0/24", "172.16.4.0/22" ; "explicit request wins")]
    #[test_case(Some(""), "10.10.0.0/24", "", "10.10.0.0/24" ; "empty request falls back")]
    fn user_allowed_ips_derivation(
        requested: Option<&str>,
        network: &str,
        module_lan: &str,
        expected: &str,
    ) {
        assert_eq!(derive_user_allowed_ips(requested, network, module_lan), expected);
    }

    #[test_case("192.168.50.0/24", Some("192.168.50.1") ; "single private subnet")]
    #[test_case("0.0.0.0/0, 192.168.2.0/24", Some("192.168.2.1") ; "skips catch all")]
    #[test_case("8.8.8.0/24", None ; "public subnet is ignored")]
    #[test_case("", None ; "empty list")]
    #[test_case("10.0.0.0/8", Some("10.0.0.1") ; "ten slash eight")]
    fn local_ip_inference(allowed_ips: &str, expected: Option<&str>) {
        assert_eq!(infer_local_ip(allowed_ips).as_deref(), expected);
    }

    #[test_case("192.168.50.0/24", true ; "single cidr")]
    #[test_case("192.168.50.0/24, 10.8.0.0/16", true ; "list")]
    #[test_case("0.0.0.0/0", true ; "catch all accepted")]
    #[test_case("192.168.50.0", false ; "missing prefix")]
    #[test_case("not-a-network/24", false ; "garbage")]
    #[test_case("", false ; "empty")]
    fn allowed_ips_validation(value: &str, expected: bool) {
        assert_eq!(validate_allowed_ips(value).is_ok(), expected);
    }
}

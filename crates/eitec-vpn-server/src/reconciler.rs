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

//! Status reconciliation: merging kernel telemetry into persisted peer
//! rows and interface aggregates.
//!
//! A pass never fails an HTTP request and never blocks behind a mutation:
//! if the per-interface lock is held, the pass for that interface is
//! skipped and the next tick retries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use eitec_vpn_core::command::CommandRunner;
use eitec_vpn_core::telemetry::{
    self, TelemetryError, TelemetrySnapshot, STALE_HANDSHAKE_TIMEOUT, WIREGUARD_OFFLINE_TIMEOUT,
    WIREGUARD_ONLINE_TIMEOUT,
};

use crate::db::interfaces::{Interface, InterfaceStore};
use crate::db::peers::{ModuleStatus, PeerStore, UserVpnStatus};
use crate::error::VpnError;
use crate::locks::InterfaceLocks;

/// Module status from handshake age: online inside the two-minute window,
/// warning while stale, offline beyond ten minutes (or never seen).
pub fn derive_module_status(handshake_age: Option<Duration>) -> ModuleStatus {
    match handshake_age {
        Some(age) if age <= WIREGUARD_ONLINE_TIMEOUT => ModuleStatus::Online,
        Some(age) if age <= STALE_HANDSHAKE_TIMEOUT => ModuleStatus::Warning,
        _ => ModuleStatus::Offline,
    }
}

/// User status is binary; the crossover is the online window.
pub fn derive_user_status(handshake_age: Option<Duration>) -> UserVpnStatus {
    match handshake_age {
        Some(age) if age <= WIREGUARD_ONLINE_TIMEOUT => UserVpnStatus::Online,
        _ => UserVpnStatus::Offline,
    }
}

pub struct StatusReconciler {
    interfaces: InterfaceStore,
    peers: PeerStore,
    runner: CommandRunner,
    locks: InterfaceLocks,
}

impl StatusReconciler {
    pub fn new(db: SqlitePool, runner: CommandRunner, locks: InterfaceLocks) -> Self {
        Self {
            interfaces: InterfaceStore::new(db.clone()),
            peers: PeerStore::new(db),
            runner,
            locks,
        }
    }

    /// One reconciliation pass over every interface; passes on distinct
    /// interfaces run concurrently.
    pub async fn sync_all(&self) {
        let interfaces = match self.interfaces.list().await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "failed to list interfaces, skipping pass");
                return;
            }
        };

        join_all(interfaces.iter().map(|iface| self.sync_interface(iface))).await;
    }

    /// Reconcile one interface. Yields without doing anything when a
    /// mutation holds the interface lock.
    pub async fn sync_interface(&self, iface: &Interface) {
        let Some(_guard) = self.locks.try_lock(iface.id) else {
            debug!(interface = %iface.name, "mutation in progress, skipping pass");
            return;
        };

        let snapshot = match telemetry::fetch(&self.runner, &iface.name).await {
            Ok(snapshot) => snapshot,
            Err(TelemetryError::InterfaceAbsent { .. }) => {
                debug!(interface = %iface.name, "interface absent, marking peers offline");
                if let Err(e) = self.mark_interface_peers_offline(iface.id).await {
                    warn!(interface = %iface.name, error = %e, "offline marking failed");
                }
                return;
            }
            Err(e) => {
                warn!(interface = %iface.name, error = %e, "telemetry fetch failed");
                return;
            }
        };

        if let Err(e) = self.apply_snapshot(iface, &snapshot).await {
            warn!(interface = %iface.name, error = %e, "snapshot merge failed");
        }
    }

    /// Merge one telemetry snapshot into persisted peer rows and the
    /// interface aggregates. `sync_interface` feeds this from the kernel;
    /// it is public so a snapshot can also be injected directly.
    pub async fn apply_snapshot(
        &self,
        iface: &Interface,
        snapshot: &TelemetrySnapshot,
    ) -> Result<(), VpnError> {
        let now = snapshot.taken_at;
        let mut online_peers: i64 = 0;
        let mut last_heartbeat: Option<DateTime<Utc>> = None;

        for peer in &snapshot.peers {
            let age = peer.handshake_age(now);
            if peer.is_online(now) {
                online_peers += 1;
            }
            if let Some(handshake) = peer.latest_handshake {
                last_heartbeat = Some(last_heartbeat.map_or(handshake, |hb| hb.max(handshake)));
            }

            if let Some(module) = self.peers.find_module_by_public_key(&peer.public_key).await? {
                // A peer the kernel lists but has never shaken hands with
                // is still unconfigured, not offline.
                if module.status == ModuleStatus::Unconfigured && peer.latest_handshake.is_none() {
                    continue;
                }
                let status = derive_module_status(age);
                self.peers
                    .record_module_observation(
                        module.id,
                        status,
                        peer.rx_bytes as i64,
                        peer.tx_bytes as i64,
                        peer.latest_handshake,
                        now,
                    )
                    .await?;
                debug!(
                    module = %module.name,
                    status = status.as_str(),
                    rx = peer.rx_bytes,
                    tx = peer.tx_bytes,
                    "module observation merged"
                );
            } else if let Some(user) = self.peers.find_user_by_public_key(&peer.public_key).await? {
                self.peers
                    .record_user_observation(
                        user.id,
                        derive_user_status(age),
                        peer.rx_bytes as i64,
                        peer.tx_bytes as i64,
                        peer.latest_handshake,
                        now,
                    )
                    .await?;
            }
            // Unknown public keys are somebody's manual peer; left alone.
        }

        self.age_absent_peers(iface, snapshot, now).await?;

        let modules = self.peers.modules_by_interface(iface.id).await?;
        let users = self.peers.active_users_by_interface(iface.id).await?;
        let total_peers = modules.len() as i64 + users.len() as i64;
        let total_traffic = (snapshot.total_rx() + snapshot.total_tx()) as i64;

        self.interfaces
            .update_aggregates(iface.id, total_peers, online_peers, total_traffic, last_heartbeat)
            .await?;

        debug!(
            interface = %iface.name,
            total_peers,
            online_peers,
            total_traffic,
            "interface aggregates updated"
        );
        Ok(())
    }

    /// Peers the snapshot no longer lists get the offline aging rule:
    /// unseen beyond the offline window means offline. Unconfigured
    /// modules have never been seen and stay as they are.
    async fn age_absent_peers(
        &self,
        iface: &Interface,
        snapshot: &TelemetrySnapshot,
        now: DateTime<Utc>,
    ) -> Result<(), VpnError> {
        let cutoff = now - chrono::Duration::from_std(WIREGUARD_OFFLINE_TIMEOUT).unwrap();

        for module in self.peers.modules_by_interface(iface.id).await? {
            if snapshot.peer(&module.public_key).is_some() {
                continue;
            }
            let unseen = module.last_seen.is_none_or(|seen| seen < cutoff);
            if unseen
                && module.status != ModuleStatus::Offline
                && module.status != ModuleStatus::Unconfigured
            {
                self.peers.set_module_status(module.id, ModuleStatus::Offline).await?;
                info!(module = %module.name, "module aged offline");
            }
        }

        for user in self.peers.active_users_by_interface(iface.id).await? {
            if snapshot.peer(&user.public_key).is_some() {
                continue;
            }
            let unseen = user.last_seen.is_none_or(|seen| seen < cutoff);
            if unseen && user.status != UserVpnStatus::Offline {
                self.peers.set_user_status(user.id, UserVpnStatus::Offline).await?;
            }
        }
        Ok(())
    }

    async fn mark_interface_peers_offline(&self, interface_id: i64) -> Result<(), VpnError> {
        for module in self.peers.modules_by_interface(interface_id).await? {
            if module.status != ModuleStatus::Offline && module.status != ModuleStatus::Unconfigured
            {
                self.peers.set_module_status(module.id, ModuleStatus::Offline).await?;
            }
        }
        for user in self.peers.active_users_by_interface(interface_id).await? {
            if user.status != UserVpnStatus::Offline {
                self.peers.set_user_status(user.id, UserVpnStatus::Offline).await?;
            }
        }
        Ok(())
    }

    /// The 30-second aging job: flip any peer unseen beyond the offline
    /// window, covering interfaces whose telemetry is gone entirely.
    pub async fn mark_offline_peers(&self) {
        let cutoff = Utc::now() - chrono::Duration::from_std(WIREGUARD_OFFLINE_TIMEOUT).unwrap();

        match self.peers.age_modules_offline(cutoff).await {
            Ok(0) => {}
            Ok(flipped) => info!(flipped, "modules aged offline"),
            Err(e) => warn!(error = %e, "module offline aging failed"),
        }
        match self.peers.age_users_offline(cutoff).await {
            Ok(0) => {}
            Ok(flipped) => info!(flipped, "user vpns aged offline"),
            Err(e) => warn!(error = %e, "user offline aging failed"),
        }
    }

    /// The five-minute drift safety net: a normal pass plus aggregate
    /// recomputation from persisted rows alone.
    pub async fn full_sync(&self) {
        self.sync_all().await;
        self.mark_offline_peers().await;

        let interfaces = match self.interfaces.list().await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "failed to list interfaces for aggregate recompute");
                return;
            }
        };

        for iface in interfaces {
            if let Err(e) = self.recompute_aggregates(&iface).await {
                warn!(interface = %iface.name, error = %e, "aggregate recompute failed");
            }
        }
    }

    async fn recompute_aggregates(&self, iface: &Interface) -> Result<(), VpnError> {
        let modules = self.peers.modules_by_interface(iface.id).await?;
        let users = self.peers.active_users_by_interface(iface.id).await?;

        let total_peers = modules.len() as i64 + users.len() as i64;
        let active_peers = modules
            .iter()
            .filter(|m| m.status == ModuleStatus::Online)
            .count() as i64
            + users
                .iter()
                .filter(|u| u.status == UserVpnStatus::Online)
                .count() as i64;
        let total_traffic: i64 = modules
            .iter()
            .map(|m| m.total_rx_bytes + m.total_tx_bytes)
            .sum::<i64>()
            + users
                .iter()
                .map(|u| u.total_rx_bytes + u.total_tx_bytes)
                .sum::<i64>();
        let last_heartbeat = modules
            .iter()
            .filter_map(|m| m.latest_handshake)
            .chain(users.iter().filter_map(|u| u.latest_handshake))
            .max();

        self.interfaces
            .update_aggregates(iface.id, total_peers, active_peers, total_traffic, last_heartbeat)
            .await?;
        Ok(())
    }

    /// Hourly data-maintenance hook. Deliberately a no-op; deployments
    /// with history tables compact them here.
    pub async fn data_maintenance(&self) {
        debug!("data maintenance tick");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(30, ModuleStatus::Online ; "thirty seconds is online")]
    #[test_case(119, ModuleStatus::Online ; "just inside the window")]
    #[test_case(180, ModuleStatus::Warning ; "three minutes is warning")]
    #[test_case(599, ModuleStatus::Warning ; "just inside stale window")]
    #[test_case(900, ModuleStatus::Offline ; "fifteen minutes is offline")]
    fn module_status_thresholds(age_secs: u64, expected: ModuleStatus) {
        let status = derive_module_status(Some(Duration::from_secs(age_secs)));
        assert_eq!(status, expected);
    }

    #[test]
    fn module_without_handshake_is_offline() {
        assert_eq!(derive_module_status(None), ModuleStatus::Offline);
    }

    #[test_case(30, UserVpnStatus::Online ; "fresh handshake")]
    #[test_case(180, UserVpnStatus::Offline ; "stale handshake")]
    fn user_status_is_binary(age_secs: u64, expected: UserVpnStatus) {
        assert_eq!(derive_user_status(Some(Duration::from_secs(age_secs))), expected);
    }
}

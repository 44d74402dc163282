use std::sync::Arc;

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;

use eitec_vpn_core::command::CommandRunner;
use eitec_vpn_core::telemetry::{self, TelemetryError};

use crate::db::interfaces::InterfaceStatus;
use crate::db::peers::PeerStore;
use crate::error::ApiError;
use crate::manager::InterfaceManager;
use crate::response;
use crate::scheduler::Scheduler;

/// One interface of the joined model + live-telemetry view.
#[derive(Debug, Serialize)]
struct InterfaceView {
    id: i64,
    name: String,
    network: String,
    server_ip: String,
    listen_port: i64,
    status: InterfaceStatus,
    is_active: bool,
    peer_count: usize,
    online_peers: usize,
    total_rx_bytes: u64,
    total_tx_bytes: u64,
    last_handshake: Option<DateTime<Utc>>,
    peers: Vec<PeerView>,
}

#[derive(Debug, Serialize)]
struct PeerView {
    public_key: String,
    name: Option<String>,
    endpoint: Option<String>,
    allowed_ips: Vec<String>,
    latest_handshake: Option<DateTime<Utc>>,
    rx_bytes: u64,
    tx_bytes: u64,
    online: bool,
}

/// Joined view of every interface: persisted model merged with one
/// on-demand telemetry snapshot per interface. An interface without a
/// kernel device is reported inactive, not failed.
async fn wireguard_interfaces(
    manager: web::Data<InterfaceManager>,
    store: web::Data<PeerStore>,
    runner: web::Data<CommandRunner>,
) -> Result<HttpResponse, ApiError> {
    let interfaces = manager.list().await?;
    let mut views = Vec::with_capacity(interfaces.len());

    for iface in interfaces {
        let snapshot = match telemetry::fetch(&runner, &iface.name).await {
            Ok(snapshot) => Some(snapshot),
            Err(TelemetryError::InterfaceAbsent { .. }) | Err(TelemetryError::ToolMissing) => None,
            Err(e) => {
                tracing::warn!(interface = %iface.name, error = %e, "telemetry fetch failed");
                None
            }
        };

        let modules = store.modules_by_interface(iface.id).await?;
        let now = Utc::now();

        let (peers, online, rx, tx, last_handshake) = match &snapshot {
            Some(snapshot) => {
                let mut peers = Vec::with_capacity(snapshot.peers.len());
                let mut online = 0usize;
                let mut last_handshake: Option<DateTime<Utc>> = None;
                for peer in &snapshot.peers {
                    let is_online = peer.is_online(now);
                    if is_online {
                        online += 1;
                    }
                    if let Some(hs) = peer.latest_handshake {
                        last_handshake = Some(last_handshake.map_or(hs, |cur| cur.max(hs)));
                    }
                    let name = modules
                        .iter()
                        .find(|m| m.public_key == peer.public_key)
                        .map(|m| m.name.clone());
                    peers.push(PeerView {
                        public_key: peer.public_key.clone(),
                        name,
                        endpoint: peer.endpoint.clone(),
                        allowed_ips: peer.allowed_ips.clone(),
                        latest_handshake: peer.latest_handshake,
                        rx_bytes: peer.rx_bytes,
                        tx_bytes: peer.tx_bytes,
                        online: is_online,
                    });
                }
                (
                    peers,
                    online,
                    snapshot.total_rx(),
                    snapshot.total_tx(),
                    last_handshake,
                )
            }
            None => (Vec::new(), 0, 0, 0, None),
        };

        views.push(InterfaceView {
            id: iface.id,
            name: iface.name,
            network: iface.network,
            server_ip: iface.server_ip,
            listen_port: iface.listen_port,
            status: iface.status,
            is_active: snapshot.is_some(),
            peer_count: peers.len(),
            online_peers: online,
            total_rx_bytes: rx,
            total_tx_bytes: tx,
            last_handshake,
            peers,
        });
    }

    Ok(response::ok(views))
}

async fn scheduler_entries(scheduler: web::Data<Arc<Scheduler>>) -> HttpResponse {
    response::ok(scheduler.entries())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/v1/system/wireguard-interfaces")
            .route(web::get().to(wireguard_interfaces)),
    )
    .service(web::resource("/api/v1/system/scheduler").route(web::get().to(scheduler_entries)));
}

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

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ServerConfig;
use crate::db::peers::{UserVpn, UserVpnStatus};
use crate::db::system::SystemConfigStore;
use crate::error::ApiError;
use crate::manager::InterfaceManager;
use crate::registry::{CreateUserVpnRequest, PeerRegistry, UpdateUserVpnRequest};
use crate::render;
use crate::response;
use crate::routes::resolve_endpoint;

#[derive(Debug, Serialize)]
pub struct UserVpnResponse {
    pub id: i64,
    pub module_id: i64,
    pub username: String,
    pub email: String,
    pub description: String,
    pub public_key: String,
    pub ip_address: String,
    pub status: UserVpnStatus,
    pub allowed_ips: String,
    pub persistent_keepalive: i64,
    pub is_active: bool,
    pub max_devices: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub total_rx_bytes: i64,
    pub total_tx_bytes: i64,
    pub latest_handshake: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserVpn> for UserVpnResponse {
    fn from(user: UserVpn) -> Self {
        Self {
            id: user.id,
            module_id: user.module_id,
            username: user.username,
            email: user.email,
            description: user.description,
            public_key: user.public_key,
            ip_address: user.ip_address,
            status: user.status,
            allowed_ips: user.allowed_ips,
            persistent_keepalive: user.persistent_keepalive,
            is_active: user.is_active,
            max_devices: user.max_devices,
            expires_at: user.expires_at,
            total_rx_bytes: user.total_rx_bytes,
            total_tx_bytes: user.total_tx_bytes,
            latest_handshake: user.latest_handshake,
            last_seen: user.last_seen,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

async fn create_user_vpn(
    registry: web::Data<PeerRegistry>,
    body: web::Json<CreateUserVpnRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = registry.create_user_vpn(body.into_inner()).await?;
    Ok(response::created(UserVpnResponse::from(user)))
}

async fn get_user_vpn(
    registry: web::Data<PeerRegistry>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let user = registry.get_user(path.into_inner()).await?;
    Ok(response::ok(UserVpnResponse::from(user)))
}

async fn update_user_vpn(
    registry: web::Data<PeerRegistry>,
    path: web::Path<i64>,
    body: web::Json<UpdateUserVpnRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = registry
        .update_user_vpn(path.into_inner(), body.into_inner())
        .await?;
    Ok(response::ok(UserVpnResponse::from(user)))
}

async fn delete_user_vpn(
    registry: web::Data<PeerRegistry>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    registry.delete_user_vpn(path.into_inner()).await?;
    Ok(response::ok(serde_json::Value::Null))
}

async fn user_vpn_config(
    registry: web::Data<PeerRegistry>,
    manager: web::Data<InterfaceManager>,
    system: web::Data<SystemConfigStore>,
    config: web::Data<ServerConfig>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let user = registry.get_user(path.into_inner()).await?;
    let module = registry.get_module(user.module_id).await?;
    let iface = manager.get(module.interface_id).await?;

    let endpoint = resolve_endpoint(&config, &system, &iface).await;
    let rendered = render::render_user_client_config(&user, &iface, &endpoint);

    Ok(HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}.conf\"", user.username),
        ))
        .body(rendered))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/v1/user-vpn").route(web::post().to(create_user_vpn)))
        .service(
            web::resource("/api/v1/user-vpn/{id}")
                .route(web::get().to(get_user_vpn))
                .route(web::put().to(update_user_vpn))
                .route(web::delete().to(delete_user_vpn)),
        )
        .service(web::resource("/api/v1/user-vpn/{id}/config").route(web::get().to(user_vpn_config)));
}

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
use serde::{Deserialize, Serialize};

use crate::db::interfaces::{Interface, InterfaceStatus};
use crate::error::ApiError;
use crate::manager::{InterfaceManager, InterfaceTemplate};
use crate::response;

#[derive(Debug, Deserialize)]
struct CreateInterfaceRequest {
    name: String,
    #[serde(default)]
    description: String,
    network: String,
    listen_port: i64,
    external_interface: String,
    #[serde(default = "default_max_peers")]
    max_peers: i64,
    #[serde(default = "default_dns")]
    dns: String,
    #[serde(default = "default_mtu")]
    mtu: i64,
    #[serde(default)]
    pre_up: Option<String>,
    #[serde(default)]
    post_up: Option<String>,
    #[serde(default)]
    pre_down: Option<String>,
    #[serde(default)]
    post_down: Option<String>,
    #[serde(default = "default_save_config")]
    save_config: bool,
}

fn default_max_peers() -> i64 {
    100
}

fn default_dns() -> String {
    "8.8.8.8,8.8.4.4".into()
}

fn default_mtu() -> i64 {
    1420
}

fn default_save_config() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct InterfaceResponse {
    id: i64,
    name: String,
    description: String,
    network: String,
    server_ip: String,
    listen_port: i64,
    public_key: String,
    status: InterfaceStatus,
    max_peers: i64,
    dns: String,
    mtu: i64,
    external_interface: String,
    save_config: bool,
    total_peers: i64,
    active_peers: i64,
    total_traffic: i64,
    last_heartbeat: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Interface> for InterfaceResponse {
    fn from(iface: Interface) -> Self {
        Self {
            id: iface.id,
            name: iface.name,
            description: iface.description,
            network: iface.network,
            server_ip: iface.server_ip,
            listen_port: iface.listen_port,
            public_key: iface.public_key,
            status: iface.status,
            max_peers: iface.max_peers,
            dns: iface.dns,
            mtu: iface.mtu,
            external_interface: iface.external_interface,
            save_config: iface.save_config,
            total_peers: iface.total_peers,
            active_peers: iface.active_peers,
            total_traffic: iface.total_traffic,
            last_heartbeat: iface.last_heartbeat,
            created_at: iface.created_at,
            updated_at: iface.updated_at,
        }
    }
}

async fn list_interfaces(
    manager: web::Data<InterfaceManager>,
) -> Result<HttpResponse, ApiError> {
    let interfaces = manager.list().await.map_err(ApiError::from)?;
    let data: Vec<InterfaceResponse> = interfaces.into_iter().map(Into::into).collect();
    Ok(response::ok(data))
}

async fn create_interface(
    manager: web::Data<InterfaceManager>,
    body: web::Json<CreateInterfaceRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let iface = manager
        .create(InterfaceTemplate {
            name: body.name,
            description: body.description,
            network: body.network,
            listen_port: body.listen_port,
            max_peers: body.max_peers,
            dns: body.dns,
            mtu: body.mtu,
            external_interface: body.external_interface,
            pre_up: body.pre_up,
            post_up: body.post_up,
            pre_down: body.pre_down,
            post_down: body.post_down,
            save_config: body.save_config,
        })
        .await?;
    Ok(response::created(InterfaceResponse::from(iface)))
}

async fn get_interface(
    manager: web::Data<InterfaceManager>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let iface = manager.get(path.into_inner()).await?;
    Ok(response::ok(InterfaceResponse::from(iface)))
}

async fn delete_interface(
    manager: web::Data<InterfaceManager>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    manager.delete(path.into_inner()).await?;
    Ok(response::ok(serde_json::Value::Null))
}

async fn start_interface(
    manager: web::Data<InterfaceManager>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let iface = manager.start(path.into_inner()).await?;
    Ok(response::ok(InterfaceResponse::from(iface)))
}

async fn stop_interface(
    manager: web::Data<InterfaceManager>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let iface = manager.stop(path.into_inner()).await?;
    Ok(response::ok(InterfaceResponse::from(iface)))
}

async fn interface_config(
    manager: web::Data<InterfaceManager>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let config = manager.render_config(path.into_inner()).await?;
    Ok(HttpResponse::Ok().content_type("text/plain; charset=utf-8").body(config))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/v1/interfaces")
            .route(web::get().to(list_interfaces))
            .route(web::post().to(create_interface)),
    )
    .service(
        web::resource("/api/v1/interfaces/{id}")
            .route(web::get().to(get_interface))
            .route(web::delete().to(delete_interface)),
    )
    .service(web::resource("/api/v1/interfaces/{id}/start").route(web::put().to(start_interface)))
    .service(web::resource("/api/v1/interfaces/{id}/stop").route(web::put().to(stop_interface)))
    .service(web::resource("/api/v1/interfaces/{id}/config").route(web::get().to(interface_config)));
}

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

use eitec_vpn_core::types::{HeartbeatReport, TrafficReport};

use crate::config::ServerConfig;
use crate::db::peers::{Module, ModuleFilter, ModuleStatus, PeerStore};
use crate::db::system::SystemConfigStore;
use crate::error::ApiError;
use crate::extract::ApiKeyModule;
use crate::manager::InterfaceManager;
use crate::registry::{infer_local_ip, CreateModuleRequest, PeerRegistry, UpdateModuleRequest};
use crate::render;
use crate::response;
use crate::routes::{redact, resolve_endpoint};

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default = "default_page")]
    page: i64,
    #[serde(default = "default_size")]
    size: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    status: Option<ModuleStatus>,
}

fn default_page() -> i64 {
    1
}

fn default_size() -> i64 {
    20
}

#[derive(Debug, Serialize)]
struct ModuleResponse {
    id: i64,
    name: String,
    location: String,
    description: String,
    interface_id: i64,
    public_key: String,
    ip_address: String,
    local_ip: Option<String>,
    status: ModuleStatus,
    allowed_ips: String,
    persistent_keepalive: i64,
    endpoint: Option<String>,
    api_key: String,
    total_rx_bytes: i64,
    total_tx_bytes: i64,
    latest_handshake: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ModuleResponse {
    fn from_module(module: Module, full_api_key: bool) -> Self {
        let api_key = if full_api_key {
            module.api_key.clone()
        } else {
            redact(&module.api_key)
        };
        Self {
            id: module.id,
            name: module.name,
            location: module.location,
            description: module.description,
            interface_id: module.interface_id,
            public_key: module.public_key,
            ip_address: module.ip_address,
            local_ip: module.local_ip,
            status: module.status,
            allowed_ips: module.allowed_ips,
            persistent_keepalive: module.persistent_keepalive,
            endpoint: module.endpoint,
            api_key,
            total_rx_bytes: module.total_rx_bytes,
            total_tx_bytes: module.total_tx_bytes,
            latest_handshake: module.latest_handshake,
            last_seen: module.last_seen,
            created_at: module.created_at,
            updated_at: module.updated_at,
        }
    }
}

async fn list_modules(
    store: web::Data<PeerStore>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ApiError> {
    let query = query.into_inner();
    let page = query.page.max(1);
    let size = query.size.clamp(1, 200);

    let filter = ModuleFilter {
        name: query.name,
        location: query.location,
        status: query.status,
    };
    let (modules, total) = store.list_modules(&filter, page, size).await?;
    let data: Vec<ModuleResponse> = modules
        .into_iter()
        .map(|m| ModuleResponse::from_module(m, false))
        .collect();
    Ok(response::page(data, total, page, size))
}

async fn create_module(
    registry: web::Data<PeerRegistry>,
    body: web::Json<CreateModuleRequest>,
) -> Result<HttpResponse, ApiError> {
    let module = registry.create_module(body.into_inner()).await?;
    Ok(response::created(ModuleResponse::from_module(module, true)))
}

async fn get_module(
    registry: web::Data<PeerRegistry>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let module = registry.get_module(path.into_inner()).await?;
    Ok(response::ok(ModuleResponse::from_module(module, true)))
}

async fn update_module(
    registry: web::Data<PeerRegistry>,
    path: web::Path<i64>,
    body: web::Json<UpdateModuleRequest>,
) -> Result<HttpResponse, ApiError> {
    let module = registry
        .update_module(path.into_inner(), body.into_inner())
        .await?;
    Ok(response::ok(ModuleResponse::from_module(module, true)))
}

async fn delete_module(
    registry: web::Data<PeerRegistry>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    registry.delete_module(path.into_inner()).await?;
    Ok(response::ok(serde_json::Value::Null))
}

async fn regenerate_keys(
    registry: web::Data<PeerRegistry>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let module = registry.regenerate_module_keys(path.into_inner()).await?;
    Ok(response::ok(ModuleResponse::from_module(module, true)))
}

/// The client config a gateway imports. One endpoint serves both the
/// operator download and the agent's periodic pull; when an `X-API-Key`
/// header is present it must resolve to this module.
async fn module_config(
    req: actix_web::HttpRequest,
    registry: web::Data<PeerRegistry>,
    manager: web::Data<InterfaceManager>,
    store: web::Data<PeerStore>,
    system: web::Data<SystemConfigStore>,
    config: web::Data<ServerConfig>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let module = registry.get_module(id).await?;

    if let Some(api_key) = req.headers().get("X-API-Key").and_then(|v| v.to_str().ok()) {
        let caller = store
            .find_module_by_api_key(api_key)
            .await?
            .ok_or(ApiError::Unauthorized)?;
        if caller.id != id {
            return Err(ApiError::Forbidden);
        }
    }

    let iface = manager.get(module.interface_id).await?;
    let endpoint = resolve_endpoint(&config, &system, &iface).await;

    let dns = if !iface.dns.is_empty() {
        iface.dns.clone()
    } else {
        config.wireguard.dns.clone()
    };

    let local_ip = module
        .local_ip
        .clone()
        .or_else(|| infer_local_ip(&module.allowed_ips))
        .unwrap_or_else(|| "192.168.1.1".into());

    let rendered = render::render_module_client_config(&module, &iface, &endpoint, &dns, &local_ip);
    Ok(HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}.conf\"", iface.name),
        ))
        .body(rendered))
}

// -- Agent callbacks (X-API-Key) ---------------------------------------------

async fn heartbeat(
    store: web::Data<PeerStore>,
    auth: ApiKeyModule,
    path: web::Path<i64>,
    body: Option<web::Json<HeartbeatReport>>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    if auth.0.id != id {
        return Err(ApiError::Forbidden);
    }

    let _ = body; // optional context, liveness is the request itself
    store.touch_module(id).await?;
    Ok(response::ok(serde_json::Value::Null))
}

async fn traffic(
    store: web::Data<PeerStore>,
    auth: ApiKeyModule,
    path: web::Path<i64>,
    body: web::Json<TrafficReport>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    if auth.0.id != id {
        return Err(ApiError::Forbidden);
    }

    let report = body.into_inner();
    store
        .record_module_traffic(id, report.rx_bytes as i64, report.tx_bytes as i64)
        .await?;
    Ok(response::ok(serde_json::Value::Null))
}

// -- Per-module user listings ------------------------------------------------

#[derive(Debug, Deserialize)]
struct UserListQuery {
    #[serde(default = "default_page")]
    page: i64,
    #[serde(default = "default_size")]
    size: i64,
}

async fn module_users(
    registry: web::Data<PeerRegistry>,
    store: web::Data<PeerStore>,
    path: web::Path<i64>,
    query: web::Query<UserListQuery>,
) -> Result<HttpResponse, ApiError> {
    let module = registry.get_module(path.into_inner()).await?;
    let page = query.page.max(1);
    let size = query.size.clamp(1, 200);

    let (users, total) = store.users_by_module(module.id, page, size).await?;
    let data: Vec<super::users::UserVpnResponse> = users
        .into_iter()
        .map(super::users::UserVpnResponse::from)
        .collect();
    Ok(response::page(data, total, page, size))
}

#[derive(Debug, Serialize)]
struct UserStats {
    total: i64,
    online: i64,
    offline: i64,
    active: i64,
}

async fn module_user_stats(
    registry: web::Data<PeerRegistry>,
    store: web::Data<PeerStore>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let module = registry.get_module(path.into_inner()).await?;
    let (total, online, offline, active) = store.user_stats(module.id).await?;
    Ok(response::ok(UserStats {
        total,
        online,
        offline,
        active,
    }))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/v1/modules")
            .route(web::get().to(list_modules))
            .route(web::post().to(create_module)),
    )
    .service(
        web::resource("/api/v1/modules/{id}")
            .route(web::get().to(get_module))
            .route(web::put().to(update_module))
            .route(web::delete().to(delete_module)),
    )
    .service(
        web::resource("/api/v1/modules/{id}/regenerate-keys")
            .route(web::post().to(regenerate_keys)),
    )
    .service(web::resource("/api/v1/modules/{id}/config").route(web::get().to(module_config)))
    .service(web::resource("/api/v1/modules/{id}/heartbeat").route(web::post().to(heartbeat)))
    .service(web::resource("/api/v1/modules/{id}/traffic").route(web::post().to(traffic)))
    .service(web::resource("/api/v1/modules/{id}/users").route(web::get().to(module_users)))
    .service(
        web::resource("/api/v1/modules/{id}/user-stats").route(web::get().to(module_user_stats)),
    );
}

//! The agent's local HTTP API: status for the on-site UI, task listing,
//! config read, and the setup push used while the module is unconfigured.

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::agent::Agent;
use crate::db::LocalStore;
use crate::status::StatusSnapshot;
use crate::tunnel::{self, TunnelDriver};

#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    code: u16,
    message: String,
    data: T,
}

fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(Envelope {
        code: 200,
        message: "ok".into(),
        data,
    })
}

fn bad_request(message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(Envelope {
        code: 400,
        message,
        data: serde_json::Value::Null,
    })
}

async fn status(snapshot: web::Data<Arc<RwLock<StatusSnapshot>>>) -> HttpResponse {
    ok(snapshot.read().await.clone())
}

async fn tasks(agent: web::Data<Arc<Agent>>) -> HttpResponse {
    ok(agent.task_names())
}

async fn read_config(driver: web::Data<Arc<TunnelDriver>>) -> HttpResponse {
    match tokio::fs::read_to_string(driver.config_path()).await {
        Ok(content) => HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .body(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            HttpResponse::NotFound().json(Envelope {
                code: 404,
                message: "no configuration on disk".into(),
                data: serde_json::Value::Null,
            })
        }
        Err(e) => HttpResponse::InternalServerError().json(Envelope {
            code: 500,
            message: e.to_string(),
            data: serde_json::Value::Null,
        }),
    }
}

#[derive(Debug, Deserialize)]
struct SetupRequest {
    config_data: String,
}

/// Push a configuration onto an unconfigured module and bring the tunnel
/// up with it.
async fn apply_setup(
    driver: web::Data<Arc<TunnelDriver>>,
    store: web::Data<LocalStore>,
    body: web::Json<SetupRequest>,
) -> HttpResponse {
    let body = body.into_inner();

    if let Err(e) = eitec_vpn_core::ini::validate_client_config(&body.config_data) {
        return bad_request(format!("invalid config: {e}"));
    }

    if let Err(e) = tunnel::write_config(driver.config_path(), body.config_data.as_bytes()).await {
        return HttpResponse::InternalServerError().json(Envelope {
            code: 500,
            message: format!("failed to write config: {e}"),
            data: serde_json::Value::Null,
        });
    }
    if let Err(e) = store.mark_configured(true).await {
        tracing::warn!(error = %e, "failed to persist configured flag");
    }

    info!("setup applied, starting tunnel");
    match driver.restart().await {
        Ok(()) => ok(serde_json::json!({ "tunnel": "up" })),
        Err(e) => HttpResponse::InternalServerError().json(Envelope {
            code: 500,
            message: format!("config written but tunnel start failed: {e}"),
            data: serde_json::Value::Null,
        }),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/v1/status").route(web::get().to(status)))
        .service(web::resource("/api/v1/tasks").route(web::get().to(tasks)))
        .service(
            web::resource("/api/v1/config")
                .route(web::get().to(read_config))
                .route(web::put().to(apply_setup)),
        )
        .service(web::resource("/api/v1/setup").route(web::post().to(apply_setup)));
}

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

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpResponse, HttpServer};
use clap::Parser;
use tokio::sync::RwLock;
use tracing::{info, warn};

use eitec_vpn_core::command::CommandRunner;
use eitec_vpn_module::agent::{self, Agent, AgentContext};
use eitec_vpn_module::client::ServerClient;
use eitec_vpn_module::config::{self, Paths};
use eitec_vpn_module::db::{self, LocalStore};
use eitec_vpn_module::routes;
use eitec_vpn_module::status::{StatusService, StatusSnapshot};
use eitec_vpn_module::tunnel::TunnelDriver;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(distribute)]
    {
        fmt().json().with_env_filter(filter).init();
    }

    #[cfg(not(distribute))]
    {
        fmt().pretty().with_env_filter(filter).init();
    }
}

#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("GIT_VERSION"))]
#[command(about = "Gateway agent for the eitec-vpn WireGuard fleet")]
struct Cli {
    /// Path to the module configuration file
    #[arg(short, long, default_value = "configs/module.yaml")]
    config: PathBuf,
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let module_config = config::load(&cli.config).expect("failed to load configuration");
    let paths = Paths::from_env();

    info!(
        module_id = module_config.module.id,
        interface = %module_config.wireguard.interface,
        "starting eitec-vpn-module"
    );

    let pool = db::open(&paths.database_path()).await;
    let store = LocalStore::new(pool);

    let runner = CommandRunner::new();
    let driver = Arc::new(TunnelDriver::new(
        runner.clone(),
        &module_config.wireguard.interface,
        paths.wireguard_config.clone(),
    ));
    let status_service = StatusService::new(
        runner.clone(),
        &module_config.wireguard.interface,
        paths.wireguard_config.clone(),
    );
    let snapshot = Arc::new(RwLock::new(StatusSnapshot::default()));

    // Seed the local identity row; the public key comes from `wg pubkey`
    // when the tool is around.
    if module_config.module.id != 0 {
        let public_key = if module_config.module.private_key.is_empty() {
            None
        } else {
            match runner.generate_public_key(&module_config.module.private_key).await {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(error = %e, "could not derive public key from private key");
                    None
                }
            }
        };
        if let Err(e) = store.sync_from_config(&module_config, public_key.as_deref()).await {
            warn!(error = %e, "failed to seed local module row");
        }
    }

    let configured = module_config.has_server_binding() && paths.wireguard_config.exists();
    let agent = Arc::new(Agent::new());

    if configured {
        match driver.start().await {
            Ok(()) => info!("tunnel started"),
            Err(e) => warn!(error = %e, "tunnel start failed; config sync will retry"),
        }

        let ctx = AgentContext {
            client: ServerClient::new(
                &module_config.server.url,
                module_config.module.id,
                &module_config.module.api_key,
            ),
            driver: driver.clone(),
            status: status_service.clone(),
            store: store.clone(),
            snapshot: snapshot.clone(),
            heartbeat_interval: Duration::from_secs(module_config.server.heartbeat_interval),
            sync_interval: Duration::from_secs(module_config.server.sync_interval),
        };
        agent::spawn_all(&agent, ctx);
    } else {
        // Setup-only mode: keep the HTTP API reachable so an operator can
        // push a configuration.
        info!("module not configured; only the local API is active");
    }

    let bind = format!("0.0.0.0:{}", module_config.app.port);
    let agent_data = web::Data::new(agent.clone());
    let driver_data = web::Data::new(driver.clone());
    let store_data = web::Data::new(store);
    let snapshot_data = web::Data::new(snapshot);

    let result = HttpServer::new(move || {
        App::new()
            .app_data(agent_data.clone())
            .app_data(driver_data.clone())
            .app_data(store_data.clone())
            .app_data(snapshot_data.clone())
            .wrap(tracing_actix_web::TracingLogger::default())
            .route("/health", web::get().to(health))
            .configure(routes::configure)
    })
    .bind(&bind)?
    .run()
    .await;

    agent.stop().await;
    if let Err(e) = driver.stop().await {
        warn!(error = %e, "tunnel stop during shutdown failed");
    }
    info!("shutdown complete");
    result
}

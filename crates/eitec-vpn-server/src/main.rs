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
use tracing::info;

use eitec_vpn_core::command::CommandRunner;
use eitec_vpn_server::config;
use eitec_vpn_server::db;
use eitec_vpn_server::db::peers::PeerStore;
use eitec_vpn_server::db::system::SystemConfigStore;
use eitec_vpn_server::locks::InterfaceLocks;
use eitec_vpn_server::manager::InterfaceManager;
use eitec_vpn_server::reconciler::StatusReconciler;
use eitec_vpn_server::registry::PeerRegistry;
use eitec_vpn_server::routes;
use eitec_vpn_server::scheduler::Scheduler;

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
#[command(about = "Control-plane server for the eitec-vpn WireGuard fleet")]
struct Cli {
    /// Path to the server configuration file
    #[arg(short, long, default_value = "configs/server.yaml")]
    config: PathBuf,

    /// Directory the interface configs are written to
    #[arg(long, default_value = "/etc/wireguard")]
    wireguard_dir: PathBuf,
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let server_config = config::load(&cli.config).expect("failed to load configuration");
    config::set_global(server_config.clone());

    info!(listen = %server_config.bind_addr(), "starting eitec-vpn-server");

    if let Some(parent) = PathBuf::from(&server_config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pool = db::create_pool(&server_config.database.path).await;
    db::migrate(&pool).await;
    info!("database migrations applied");

    let runner = CommandRunner::new();
    let locks = InterfaceLocks::new();

    let manager = Arc::new(InterfaceManager::new(
        pool.clone(),
        runner.clone(),
        locks.clone(),
        cli.wireguard_dir.clone(),
    ));
    let registry = PeerRegistry::new(pool.clone(), manager.clone(), locks.clone());
    let reconciler = Arc::new(StatusReconciler::new(
        pool.clone(),
        runner.clone(),
        locks.clone(),
    ));
    let peer_store = PeerStore::new(pool.clone());
    let system_store = SystemConfigStore::new(pool.clone());

    let scheduler = Arc::new(Scheduler::new());
    register_jobs(&scheduler, reconciler.clone());
    scheduler.start().await;

    let bind = server_config.bind_addr();
    let config_data = web::Data::new(server_config);
    let manager_data = web::Data::from(manager);
    let registry_data = web::Data::new(registry);
    let store_data = web::Data::new(peer_store);
    let system_data = web::Data::new(system_store);
    let runner_data = web::Data::new(runner);
    let scheduler_data = web::Data::new(scheduler.clone());

    let result = HttpServer::new(move || {
        App::new()
            .app_data(config_data.clone())
            .app_data(manager_data.clone())
            .app_data(registry_data.clone())
            .app_data(store_data.clone())
            .app_data(system_data.clone())
            .app_data(runner_data.clone())
            .app_data(scheduler_data.clone())
            .wrap(tracing_actix_web::TracingLogger::default())
            .route("/health", web::get().to(health))
            .configure(routes::interfaces::configure)
            .configure(routes::modules::configure)
            .configure(routes::users::configure)
            .configure(routes::system::configure)
    })
    .bind(&bind)?
    .run()
    .await;

    scheduler.stop().await;
    result
}

/// The four fixed cadences the reconciler runs on.
fn register_jobs(scheduler: &Scheduler, reconciler: Arc<StatusReconciler>) {
    let sync = reconciler.clone();
    scheduler.add_job(
        "wireguard-sync",
        Duration::from_secs(10),
        Arc::new(move || {
            let sync = sync.clone();
            Box::pin(async move { sync.sync_all().await })
        }),
    );

    let aging = reconciler.clone();
    scheduler.add_job(
        "offline-aging",
        Duration::from_secs(30),
        Arc::new(move || {
            let aging = aging.clone();
            Box::pin(async move { aging.mark_offline_peers().await })
        }),
    );

    let full = reconciler.clone();
    scheduler.add_job(
        "full-sync",
        Duration::from_secs(300),
        Arc::new(move || {
            let full = full.clone();
            Box::pin(async move { full.full_sync().await })
        }),
    );

    let maintenance = reconciler;
    scheduler.add_job(
        "data-maintenance",
        Duration::from_secs(3600),
        Arc::new(move || {
            let maintenance = maintenance.clone();
            Box::pin(async move { maintenance.data_maintenance().await })
        }),
    );
}

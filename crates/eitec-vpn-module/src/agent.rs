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

//! Cooperative supervision of the agent's background tasks.
//!
//! Tasks register under a name, share one shutdown signal, and are awaited
//! (up to a deadline) on stop. The names are served by the local API so an
//! operator can see what the agent is running.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use eitec_vpn_core::types::HeartbeatReport;

use crate::client::ServerClient;
use crate::db::LocalStore;
use crate::status::{StatusService, StatusSnapshot};
use crate::tunnel::{self, TunnelDriver};

/// How long `stop` waits for tasks before returning anyway.
const STOP_DEADLINE: Duration = Duration::from_secs(30);

/// Cadence of the traffic reporter.
const TRAFFIC_INTERVAL: Duration = Duration::from_secs(30);

/// Cadence of the local status refresh.
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

struct NamedTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// Shared task supervisor; `spawn` registers, `stop` signals and waits.
pub struct Agent {
    shutdown: broadcast::Sender<()>,
    tasks: StdMutex<Vec<NamedTask>>,
}

impl Agent {
    pub fn new() -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            shutdown,
            tasks: StdMutex::new(Vec::new()),
        }
    }

    pub fn spawn<F, Fut>(&self, name: &'static str, task: F)
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.shutdown.subscribe()));
        self.tasks.lock().unwrap().push(NamedTask { name, handle });
        debug!(task = name, "background task registered");
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.lock().unwrap().iter().map(|t| t.name).collect()
    }

    /// Cancel the shared signal and wait for every task, up to the
    /// 30-second deadline.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(());

        let drained: Vec<NamedTask> = {
            let mut tasks = self.tasks.lock().unwrap();
            tasks.drain(..).collect()
        };

        let names: Vec<&'static str> = drained.iter().map(|t| t.name).collect();
        let join = futures_join(drained);
        match tokio::time::timeout(STOP_DEADLINE, join).await {
            Ok(()) => info!(?names, "agent tasks stopped"),
            Err(_) => warn!(?names, "stop deadline exceeded, abandoning tasks"),
        }
    }
}

impl Default for Agent {
    fn default() -> Self {
        Self::new()
    }
}

async fn futures_join(tasks: Vec<NamedTask>) {
    for task in tasks {
        if let Err(e) = task.handle.await {
            if !e.is_cancelled() {
                warn!(task = task.name, error = %e, "task join failed");
            }
        }
    }
}

// -- The four supervised tasks -----------------------------------------------

/// Everything the tasks share.
#[derive(Clone)]
pub struct AgentContext {
    pub client: ServerClient,
    pub driver: Arc<TunnelDriver>,
    pub status: StatusService,
    pub store: LocalStore,
    pub snapshot: Arc<RwLock<StatusSnapshot>>,
    pub heartbeat_interval: Duration,
    pub sync_interval: Duration,
}

/// Register heartbeat, traffic, config-pull and status-refresh on the
/// supervisor.
pub fn spawn_all(agent: &Agent, ctx: AgentContext) {
    let heartbeat_ctx = ctx.clone();
    agent.spawn("heartbeat", move |shutdown| {
        run_heartbeat(heartbeat_ctx, shutdown)
    });

    let traffic_ctx = ctx.clone();
    agent.spawn("traffic-report", move |shutdown| {
        run_traffic_reporter(traffic_ctx, shutdown)
    });

    let sync_ctx = ctx.clone();
    agent.spawn("config-sync", move |shutdown| run_config_sync(sync_ctx, shutdown));

    agent.spawn("status-refresh", move |shutdown| {
        run_status_refresh(ctx, shutdown)
    });
}

/// POST liveness on every tick; failures are logged and retried next
/// tick, nothing more.
async fn run_heartbeat(ctx: AgentContext, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(ctx.heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = HeartbeatReport {
                    tunnel_up: ctx.driver.is_up().await,
                    latest_handshake: ctx.snapshot.read().await.vpn.latest_handshake,
                };
                if let Err(e) = ctx.client.send_heartbeat(&report).await {
                    warn!(error = %e, "heartbeat failed");
                }
            }
            _ = shutdown.recv() => {
                debug!("heartbeat task shutting down");
                break;
            }
        }
    }
}

async fn run_traffic_reporter(ctx: AgentContext, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(TRAFFIC_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match ctx.status.traffic().await {
                    Some(report) => {
                        debug!(rx = report.rx_bytes, tx = report.tx_bytes, "reporting traffic");
                        if let Err(e) = ctx.client.report_traffic(&report).await {
                            warn!(error = %e, "traffic report failed");
                        }
                    }
                    None => debug!("tunnel down, no traffic to report"),
                }
            }
            _ = shutdown.recv() => {
                debug!("traffic task shutting down");
                break;
            }
        }
    }
}

/// Pull the config and, when the bytes differ from disk, rewrite it and
/// cycle the tunnel.
async fn run_config_sync(ctx: AgentContext, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(ctx.sync_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = sync_config_once(&ctx).await {
                    warn!(error = %e, "config sync failed");
                }
            }
            _ = shutdown.recv() => {
                debug!("config sync task shutting down");
                break;
            }
        }
    }
}

/// One config-pull cycle, factored out so tests can drive it directly.
pub async fn sync_config_once(ctx: &AgentContext) -> Result<bool, crate::AgentError> {
    let fetched = ctx.client.fetch_config().await?;

    let current = match tokio::fs::read(ctx.driver.config_path()).await {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    if current.as_deref() == Some(fetched.as_slice()) {
        debug!("config unchanged");
        return Ok(false);
    }

    let content = String::from_utf8_lossy(&fetched);
    eitec_vpn_core::ini::validate_client_config(&content)?;

    tunnel::write_config(ctx.driver.config_path(), &fetched).await?;
    info!(path = %ctx.driver.config_path().display(), "config updated, cycling tunnel");

    ctx.driver.restart().await?;
    ctx.store.mark_synced().await?;
    Ok(true)
}

async fn run_status_refresh(ctx: AgentContext, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = ctx.status.snapshot().await;
                *ctx.snapshot.write().await = snapshot;
            }
            _ = shutdown.recv() => {
                debug!("status refresh task shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawned_tasks_are_enumerable_and_stop() {
        let agent = Agent::new();

        agent.spawn("looper", |mut shutdown| async move {
            let _ = shutdown.recv().await;
        });
        agent.spawn("another", |mut shutdown| async move {
            let _ = shutdown.recv().await;
        });

        assert_eq!(agent.task_names(), vec!["looper", "another"]);

        agent.stop().await;
        assert!(agent.task_names().is_empty());
    }

    #[tokio::test]
    async fn stop_waits_for_task_cleanup() {
        let agent = Agent::new();
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let task_flag = flag.clone();

        agent.spawn("cleanup", move |mut shutdown| async move {
            let _ = shutdown.recv().await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            task_flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        agent.stop().await;
        assert!(flag.load(std::sync::atomic::Ordering::SeqCst));
    }
}

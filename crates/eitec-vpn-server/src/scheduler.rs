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

//! Periodic job supervisor for the reconciler's timers.
//!
//! Jobs run on fixed periods. A job that overruns its period does not queue
//! the missed tick; the next tick simply fires later. `stop` waits for
//! in-flight jobs up to a 30-second deadline.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// How long `stop` waits for running jobs before giving up.
const STOP_DEADLINE: Duration = Duration::from_secs(30);

pub type JobFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct JobEntry {
    pub id: u64,
    pub name: String,
    pub every_secs: u64,
    pub last_run: Option<DateTime<Utc>>,
}

struct Job {
    name: String,
    every: Duration,
    run: JobFn,
    cancelled: Arc<AtomicBool>,
    last_run: Arc<StdMutex<Option<DateTime<Utc>>>>,
}

#[derive(Default)]
pub struct Scheduler {
    jobs: StdMutex<HashMap<u64, Arc<Job>>>,
    next_id: AtomicU64,
    running: AtomicBool,
    shutdown: StdMutex<Option<broadcast::Sender<()>>>,
    handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job to run every `every`. Jobs registered after `start`
    /// are picked up immediately.
    pub fn add_job(&self, name: impl Into<String>, every: Duration, run: JobFn) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let job = Arc::new(Job {
            name: name.into(),
            every,
            run,
            cancelled: Arc::new(AtomicBool::new(false)),
            last_run: Arc::new(StdMutex::new(None)),
        });

        debug!(job = %job.name, every_secs = every.as_secs(), id, "job registered");
        self.jobs.lock().unwrap().insert(id, job.clone());

        if self.running.load(Ordering::SeqCst) {
            if let Some(tx) = self.shutdown.lock().unwrap().as_ref() {
                self.spawn_job(job, tx.subscribe());
            }
        }
        id
    }

    /// Cancel a job. Takes effect at its next tick.
    pub fn remove_job(&self, id: u64) {
        if let Some(job) = self.jobs.lock().unwrap().remove(&id) {
            job.cancelled.store(true, Ordering::SeqCst);
            debug!(job = %job.name, id, "job removed");
        }
    }

    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let (tx, _) = broadcast::channel(1);
        let jobs: Vec<Arc<Job>> = self.jobs.lock().unwrap().values().cloned().collect();
        for job in &jobs {
            self.spawn_job(job.clone(), tx.subscribe());
        }
        *self.shutdown.lock().unwrap() = Some(tx);

        info!(job_count = jobs.len(), "scheduler started");
    }

    fn spawn_job(&self, job: Arc<Job>, mut shutdown: broadcast::Receiver<()>) {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(job.every);
            // Overruns drop ticks instead of queueing them.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first interval tick fires immediately; swallow it so the
            // job first runs one period after start.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if job.cancelled.load(Ordering::SeqCst) {
                            break;
                        }
                        *job.last_run.lock().unwrap() = Some(Utc::now());
                        (job.run)().await;
                    }
                    _ = shutdown.recv() => {
                        debug!(job = %job.name, "job shutting down");
                        break;
                    }
                }
            }
        });

        self.handles.lock().unwrap().push(handle);
    }

    /// Signal every job and wait for in-flight runs, up to the deadline.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.shutdown.lock().unwrap().take() {
            let _ = tx.send(());
        }

        let drained: Vec<JoinHandle<()>> = {
            let mut handles = self.handles.lock().unwrap();
            handles.drain(..).collect()
        };

        match tokio::time::timeout(STOP_DEADLINE, futures::future::join_all(drained)).await {
            Ok(_) => info!("scheduler stopped"),
            Err(_) => warn!("scheduler stop deadline exceeded, abandoning in-flight jobs"),
        }
    }

    /// Snapshot of the registered jobs for the status endpoint.
    pub fn entries(&self) -> Vec<JobEntry> {
        let mut entries: Vec<JobEntry> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .map(|(id, job)| JobEntry {
                id: *id,
                name: job.name.clone(),
                every_secs: job.every.as_secs(),
                last_run: *job.last_run.lock().unwrap(),
            })
            .collect();
        entries.sort_by_key(|e| e.id);
        entries
    }
}

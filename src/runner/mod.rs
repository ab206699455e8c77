//! Job runner: one worker pool per job type.
//!
//! Each worker loops reserve → handle → complete/fail. Workers sleep on the
//! queue's notify channel with a poll fallback, so a notification is a
//! wake-up hint and never load-bearing. Long handlers stay alive through a
//! background heartbeat at a third of the lease.

pub mod handlers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::data::models::{Job, JobType};
use crate::db::DbContext;
use crate::db::jobs::FailOutcome;
use crate::error::Error;
use crate::queue::JobQueue;

/// Fallback poll interval when no notification arrives.
const POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Back-off after an unexpected repository error.
const ERROR_BACKOFF: Duration = Duration::from_secs(10);

/// What a handler did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Success,
    /// Nothing to do (e.g. all events already consumed). Completes the job.
    Noop,
}

/// Per-type job handler seam.
///
/// The browser handler lives in the instrumentation process and is not
/// registered here; this binary wires rules, alert, and secret_refresh.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Component label used in failure records.
    fn component(&self) -> &'static str;

    async fn handle(&self, job: &Job) -> anyhow::Result<HandlerOutcome>;
}

/// Worker pool for a single job type.
pub struct Runner {
    queue: JobQueue,
    ctx: DbContext,
    job_type: JobType,
    workers: usize,
    lease: Duration,
    handler: Arc<dyn JobHandler>,
}

impl Runner {
    pub fn new(
        queue: JobQueue,
        ctx: DbContext,
        job_type: JobType,
        workers: usize,
        lease: Duration,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        Runner {
            queue,
            ctx,
            job_type,
            workers: workers.max(1),
            lease,
            handler,
        }
    }

    /// Spawn the worker loops; resolves when all of them have wound down.
    pub async fn run(self: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        info!(
            job_type = %self.job_type,
            workers = self.workers,
            "runner started"
        );

        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let runner = Arc::clone(&self);
            let shutdown_rx = shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                runner.worker_loop(worker_id, shutdown_rx).await;
            }));
        }

        futures::future::join_all(handles).await;
        info!(job_type = %self.job_type, "runner stopped");
    }

    async fn worker_loop(&self, worker_id: usize, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!(job_type = %self.job_type, worker_id, "worker started");

        let mut notify_rx = match self.queue.subscribe(self.job_type).await {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!(
                    job_type = %self.job_type,
                    worker_id,
                    error = %e,
                    "job notifications unavailable; polling only"
                );
                None
            }
        };

        loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            match self.queue.reserve_next(self.job_type, self.lease).await {
                Ok(job) => self.process_job(worker_id, job).await,
                Err(Error::NoJobsAvailable) => {
                    // Park until new work is signalled, the poll interval
                    // elapses, or shutdown arrives. The poll fallback is
                    // jittered so workers across processes spread out.
                    let jitter =
                        Duration::from_millis(rand::rng().random_range(0..1000));
                    tokio::select! {
                        _ = async {
                            match notify_rx.as_mut() {
                                Some(rx) => { rx.recv().await; }
                                None => std::future::pending::<()>().await,
                            }
                        } => {}
                        _ = time::sleep(POLL_INTERVAL + jitter) => {}
                        _ = shutdown_rx.recv() => break,
                    }
                }
                Err(e) => {
                    error!(
                        job_type = %self.job_type,
                        worker_id,
                        error = %e,
                        "failed to reserve job"
                    );
                    tokio::select! {
                        _ = time::sleep(ERROR_BACKOFF) => {}
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }
        }

        debug!(job_type = %self.job_type, worker_id, "worker exiting");
    }

    async fn process_job(&self, worker_id: usize, job: Job) {
        let job_id = job.id;
        let started = Instant::now();
        debug!(job_type = %self.job_type, worker_id, job_id = %job_id, "processing job");

        // Heartbeat at a third of the lease while the handler runs.
        let heartbeat_cancel = CancellationToken::new();
        let heartbeat = {
            let queue = self.queue.clone();
            let lease = self.lease;
            let cancel = heartbeat_cancel.clone();
            tokio::spawn(async move {
                let mut interval = time::interval(lease / 3);
                interval.tick().await; // immediate first tick
                loop {
                    tokio::select! {
                        _ = interval.tick() => {}
                        _ = cancel.cancelled() => break,
                    }
                    match queue.heartbeat(job_id, lease).await {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!(job_id = %job_id, "lease lost; job no longer running");
                            break;
                        }
                        Err(e) => warn!(job_id = %job_id, error = %e, "heartbeat failed"),
                    }
                }
            })
        };

        let result = self.handler.handle(&job).await;
        heartbeat_cancel.cancel();
        let _ = heartbeat.await;

        let duration = started.elapsed();
        match result {
            Ok(outcome) => {
                match self.queue.complete(job_id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(job_id = %job_id, "job was no longer running at completion")
                    }
                    Err(e) => error!(job_id = %job_id, error = %e, "failed to complete job"),
                }
                self.release_fire_key(&job).await;
                info!(
                    job_type = %self.job_type,
                    job_id = %job_id,
                    transition = "completed",
                    result = match outcome {
                        HandlerOutcome::Success => "success",
                        HandlerOutcome::Noop => "noop",
                    },
                    duration_ms = duration.as_millis() as u64,
                    "job finished"
                );
            }
            Err(e) => {
                let class = classify_handler_error(&e);
                let message = format!("[{class}] {}: {e:#}", self.handler.component());
                match self.queue.fail_with_details(job_id, &message).await {
                    Ok(FailOutcome::Retried) => {
                        warn!(
                            job_type = %self.job_type,
                            job_id = %job_id,
                            transition = "failed",
                            result = "error",
                            error = %e,
                            retrying = true,
                            duration_ms = duration.as_millis() as u64,
                            "job failed; re-queued"
                        );
                    }
                    Ok(FailOutcome::Failed) => {
                        self.release_fire_key(&job).await;
                        error!(
                            job_type = %self.job_type,
                            job_id = %job_id,
                            transition = "failed",
                            result = "error",
                            error = %e,
                            retrying = false,
                            duration_ms = duration.as_millis() as u64,
                            "job failed terminally"
                        );
                    }
                    Ok(FailOutcome::NotRunning) => {
                        warn!(job_id = %job_id, "job was no longer running at failure")
                    }
                    Err(fail_err) => {
                        error!(job_id = %job_id, error = %fail_err, "failed to record job failure")
                    }
                }
            }
        }
    }

    /// Clear the scheduled task's `active_fire_key` when a scheduler-origin
    /// job reaches a terminal state and the key still belongs to it.
    async fn release_fire_key(&self, job: &Job) {
        let (Some(task_name), Some(fire_key)) = (job.task_name(), job.fire_key()) else {
            return;
        };
        match self
            .ctx
            .scheduled_tasks()
            .release_fire_key(task_name, fire_key)
            .await
        {
            Ok(true) => debug!(task = task_name, "fire-key released"),
            Ok(false) => {}
            Err(e) => warn!(task = task_name, error = %e, "failed to release fire-key"),
        }
    }
}

/// [`crate::services::Service`] wrapper that owns one runner's worker pool.
pub struct RunnerService {
    runner: Option<Arc<Runner>>,
    name: &'static str,
    statuses: crate::status::ServiceStatusRegistry,
    handle: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl RunnerService {
    /// `name` must be 'static because the `Service` trait reports it; use
    /// one of the fixed per-type labels.
    pub fn new(
        runner: Runner,
        name: &'static str,
        statuses: crate::status::ServiceStatusRegistry,
    ) -> Self {
        RunnerService {
            runner: Some(Arc::new(runner)),
            name,
            statuses,
            handle: None,
            shutdown_tx: None,
        }
    }
}

#[async_trait::async_trait]
impl crate::services::Service for RunnerService {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        let runner = self
            .runner
            .take()
            .ok_or_else(|| anyhow::anyhow!("runner already started"))?;

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        self.handle = Some(tokio::spawn(async move {
            runner.run(&shutdown_tx).await;
        }));
        self.statuses
            .set(self.name, crate::status::ServiceStatus::Active);

        std::future::pending::<()>().await;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.statuses
            .set(self.name, crate::status::ServiceStatus::Disabled);
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await?;
        }
        Ok(())
    }
}

/// Map a handler error to a coarse class for the failure record.
fn classify_handler_error(err: &anyhow::Error) -> &'static str {
    match err.downcast_ref::<Error>() {
        Some(Error::Timeout(_)) => "timeout",
        Some(Error::Canceled) => "canceled",
        Some(Error::Validation { .. }) => "validation",
        Some(Error::NotFound { .. }) => "not_found",
        Some(Error::Conflict { .. }) => "conflict",
        Some(Error::ForeignKey { .. }) => "foreign_key",
        Some(Error::Cache(_)) => "cache",
        Some(_) => "database",
        None => {
            if err.downcast_ref::<reqwest::Error>().is_some() {
                "http"
            } else {
                "internal"
            }
        }
    }
}

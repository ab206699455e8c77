//! Reaper: keeps the jobs and job_results tables bounded.
//!
//! On a long interval, in bounded batches: fail stale pending jobs, recover
//! jobs whose lease expired with a dead worker, and delete terminal jobs
//! and old results past their retention windows.

use tokio::sync::broadcast;
use tokio::time;
use tracing::{error, info};

use crate::config::ReaperConfig;
use crate::data::models::{JobStatus, JobType};
use crate::db::DbContext;
use crate::error::Result;

/// Row counts from one reaper sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepCounts {
    pub stale_failed: u64,
    pub leases_recovered: u64,
    pub completed_deleted: u64,
    pub failed_deleted: u64,
    pub results_deleted: u64,
}

pub struct Reaper {
    ctx: DbContext,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(ctx: DbContext, config: ReaperConfig) -> Self {
        Reaper { ctx, config }
    }

    /// Run the reaper loop until shutdown. The first sweep happens one full
    /// interval after startup; crash recovery is the queue's lease reclaim.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            interval = format!("{:.0?}", self.config.interval),
            batch = self.config.batch,
            "reaper started"
        );
        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        interval.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep().await {
                        Ok(counts) => info!(
                            stale_failed = counts.stale_failed,
                            leases_recovered = counts.leases_recovered,
                            completed_deleted = counts.completed_deleted,
                            failed_deleted = counts.failed_deleted,
                            results_deleted = counts.results_deleted,
                            "reaper sweep finished"
                        ),
                        Err(e) => error!(error = %e, "reaper sweep failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("reaper received shutdown signal");
                    break;
                }
            }
        }
        info!("reaper exiting gracefully");
    }

    /// One bounded pass over every retention rule.
    pub async fn sweep(&self) -> Result<SweepCounts> {
        let jobs = self.ctx.jobs();
        let mut counts = SweepCounts {
            stale_failed: jobs
                .fail_stale_pending(self.config.stale_threshold, self.config.batch)
                .await?,
            leases_recovered: jobs.recover_expired_leases(self.config.batch).await?,
            completed_deleted: jobs
                .delete_old(
                    JobStatus::Completed,
                    self.config.completed_retention,
                    self.config.batch,
                )
                .await?,
            failed_deleted: jobs
                .delete_old(
                    JobStatus::Failed,
                    self.config.failed_retention,
                    self.config.batch,
                )
                .await?,
            results_deleted: 0,
        };

        for job_type in JobType::ALL {
            counts.results_deleted += self
                .ctx
                .job_results()
                .delete_old(job_type, self.config.result_retention, self.config.batch)
                .await?;
        }

        Ok(counts)
    }
}

/// [`crate::services::Service`] wrapper that owns the reaper task.
pub struct ReaperService {
    reaper: Option<Reaper>,
    statuses: crate::status::ServiceStatusRegistry,
    handle: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl ReaperService {
    pub fn new(reaper: Reaper, statuses: crate::status::ServiceStatusRegistry) -> Self {
        ReaperService {
            reaper: Some(reaper),
            statuses,
            handle: None,
            shutdown_tx: None,
        }
    }
}

#[async_trait::async_trait]
impl crate::services::Service for ReaperService {
    fn name(&self) -> &'static str {
        "reaper"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        let reaper = self
            .reaper
            .take()
            .ok_or_else(|| anyhow::anyhow!("reaper already started"))?;

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let shutdown_rx = shutdown_tx.subscribe();
        self.handle = Some(tokio::spawn(async move {
            reaper.run(shutdown_rx).await;
        }));
        self.statuses
            .set("reaper", crate::status::ServiceStatus::Active);

        std::future::pending::<()>().await;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.statuses
            .set("reaper", crate::status::ServiceStatus::Disabled);
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await?;
        }
        Ok(())
    }
}

//! Periodic scheduler.
//!
//! On each tick the scheduler snapshots due tasks, then handles each one in
//! its own transaction: take the per-task advisory lock, re-check dueness
//! under a row lock, apply the task's overrun policy, and enqueue a job
//! carrying a unique fire-key. Multiple scheduler processes may tick
//! concurrently; the advisory lock serializes them per task and the
//! fire-key unique index backstops the race that remains.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::data::models::{OverrunPolicy, OverrunStateMask, ScheduledTask};
use crate::db::DbContext;
use crate::db::jobs::NewJob;
use crate::error::Result;
use crate::queue::JobQueue;

/// Metadata keys stamped on scheduler-originated jobs.
pub const META_TASK_NAME: &str = "scheduler.task_name";
pub const META_FIRE_KEY: &str = "scheduler.fire_key";

/// Derive the per-invocation fire-key for a task.
pub fn fire_key(task_name: &str) -> String {
    format!(
        "{}:{}",
        task_name,
        Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
    )
}

/// What one task's tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickDecision {
    Queued,
    SkippedOverrun,
    Rescheduled,
    NotDue,
    /// The insert lost the fire-key race; the transaction is aborted and
    /// must be rolled back, and the next tick re-evaluates the task.
    FireKeyConflict,
}

pub struct Scheduler {
    ctx: DbContext,
    queue: JobQueue,
    tick_interval: Duration,
    batch: i64,
}

impl Scheduler {
    pub fn new(ctx: DbContext, queue: JobQueue, tick_interval: Duration, batch: i64) -> Self {
        Scheduler {
            ctx,
            queue,
            tick_interval,
            batch,
        }
    }

    /// Run the scheduler loop until shutdown.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            tick = format!("{:.0?}", self.tick_interval),
            batch = self.batch,
            "scheduler started"
        );
        let mut interval = time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "scheduler tick failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("scheduler received shutdown signal");
                    break;
                }
            }
        }
        info!("scheduler exiting gracefully");
    }

    /// One pass over due tasks. Task-level failures are logged and do not
    /// stop the rest of the batch.
    pub async fn tick(&self) -> Result<()> {
        let candidates = self.ctx.scheduled_tasks().due_candidates(self.batch).await?;
        if candidates.is_empty() {
            return Ok(());
        }
        debug!(candidates = candidates.len(), "scheduler tick");

        for task in candidates {
            match self.process_task(&task).await {
                Ok(decision) => {
                    debug!(task = %task.task_name, ?decision, "task processed");
                }
                Err(e) => {
                    warn!(task = %task.task_name, error = %e, "failed to process scheduled task");
                }
            }
        }
        Ok(())
    }

    async fn process_task(&self, candidate: &ScheduledTask) -> Result<TickDecision> {
        let mut tx = self.ctx.pool().begin().await?;
        let tasks = self.ctx.scheduled_tasks();

        // Cross-process serialization point. Held until commit/rollback.
        if !tasks.try_task_lock(&mut tx, &candidate.task_name).await? {
            return Ok(TickDecision::NotDue);
        }

        // Another scheduler may have fired this task since the snapshot.
        let Some(task) = tasks.lock_due_task(&mut tx, candidate.id).await? else {
            return Ok(TickDecision::NotDue);
        };

        let decision = match task.overrun_policy {
            OverrunPolicy::Skip => {
                let states = self.ctx.jobs().states_by_task_name(&task.task_name).await?;
                if states.intersects(task.overrun_mask()) {
                    // Advance the cadence as if queued so the task does not
                    // fire immediately once the overrun clears.
                    tasks.set_last_queued(&mut tx, task.id, Utc::now()).await?;
                    debug!(
                        task = %task.task_name,
                        states = ?states,
                        "overrun detected; skipping this firing"
                    );
                    TickDecision::SkippedOverrun
                } else {
                    self.enqueue(&mut tx, &task).await?
                }
            }
            OverrunPolicy::Queue => self.enqueue(&mut tx, &task).await?,
            OverrunPolicy::Reschedule => {
                if tasks.clear_stale_fire_key(&mut tx, task.id).await? {
                    self.enqueue(&mut tx, &task).await?
                } else {
                    // Previous firing is still in flight; retry sooner than a
                    // full interval.
                    let retry_at = Utc::now()
                        - chrono::Duration::seconds(task.interval_secs / 2);
                    tasks.set_last_queued(&mut tx, task.id, retry_at).await?;
                    TickDecision::Rescheduled
                }
            }
        };

        if decision == TickDecision::FireKeyConflict {
            // The failed insert poisoned the transaction; drop it and treat
            // the firing as a benign overrun.
            tx.rollback().await?;
            return Ok(TickDecision::SkippedOverrun);
        }

        tx.commit().await?;
        Ok(decision)
    }

    /// Insert the task's job with a fresh fire-key, in the same transaction
    /// as the cadence update. A fire-key conflict means another firing won
    /// the race after our lock snapshot; the transaction rolls back and the
    /// next tick re-evaluates the task.
    async fn enqueue(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        task: &ScheduledTask,
    ) -> Result<TickDecision> {
        let key = fire_key(&task.task_name);

        let mut new_job = NewJob::new(task.default_job_type, task.payload.clone());
        new_job.priority = task.priority;
        new_job.max_retries = task.max_retries;
        new_job.metadata = json!({
            META_TASK_NAME: task.task_name,
            META_FIRE_KEY: key,
        });

        match self.queue.create_in_tx(tx, &new_job).await {
            Ok(job) => {
                self.ctx
                    .scheduled_tasks()
                    .mark_queued(tx, task.id, &key)
                    .await?;
                info!(task = %task.task_name, job_id = %job.id, "scheduled task fired");
                Ok(TickDecision::Queued)
            }
            Err(e) if e.is_conflict_on(META_FIRE_KEY) => {
                debug!(task = %task.task_name, "fire-key conflict; benign overrun");
                Ok(TickDecision::FireKeyConflict)
            }
            Err(e) => Err(e),
        }
    }
}

/// Convenience: evaluate whether a state mask trips a task's overrun mask.
pub fn is_overrun(states: OverrunStateMask, task_mask: OverrunStateMask) -> bool {
    states.intersects(task_mask)
}

/// [`crate::services::Service`] wrapper that owns the scheduler task.
pub struct SchedulerService {
    scheduler: Option<Scheduler>,
    statuses: crate::status::ServiceStatusRegistry,
    handle: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

impl SchedulerService {
    pub fn new(scheduler: Scheduler, statuses: crate::status::ServiceStatusRegistry) -> Self {
        SchedulerService {
            scheduler: Some(scheduler),
            statuses,
            handle: None,
            shutdown_tx: None,
        }
    }
}

#[async_trait::async_trait]
impl crate::services::Service for SchedulerService {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    async fn run(&mut self) -> Result<(), anyhow::Error> {
        let scheduler = self
            .scheduler
            .take()
            .ok_or_else(|| anyhow::anyhow!("scheduler already started"))?;

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let shutdown_rx = shutdown_tx.subscribe();
        self.handle = Some(tokio::spawn(async move {
            scheduler.run(shutdown_rx).await;
        }));
        self.statuses
            .set("scheduler", crate::status::ServiceStatus::Active);

        std::future::pending::<()>().await;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), anyhow::Error> {
        self.statuses
            .set("scheduler", crate::status::ServiceStatus::Disabled);
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_keys_embed_task_name_and_differ_per_call() {
        let a = fire_key("sweep");
        let b = fire_key("sweep");
        assert!(a.starts_with("sweep:"));
        assert_ne!(a, b);
    }

    #[test]
    fn overrun_requires_mask_intersection() {
        let states = OverrunStateMask::PENDING;
        assert!(is_overrun(states, OverrunStateMask::PENDING | OverrunStateMask::RUNNING));
        assert!(!is_overrun(states, OverrunStateMask::OVERDUE));
        assert!(!is_overrun(OverrunStateMask::empty(), OverrunStateMask::all()));
    }
}

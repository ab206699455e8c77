//! Job queue service layer.
//!
//! Wraps the job repository with enqueue validation, cross-process dedupe
//! for rules jobs, and LISTEN/NOTIFY wake-up subscriptions. Consumers use
//! the subscription channel purely as a wake-up; availability is always
//! gated on `reserve_next`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sqlx::postgres::PgListener;
use sqlx::{Postgres, Transaction};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{Cache, keys};
use crate::data::models::{Job, JobStatus, JobType};
use crate::data::payloads::RulesJobPayload;
use crate::db::DbContext;
use crate::db::jobs::{FailOutcome, JobStatRow, NewJob, notify_channel};
use crate::error::{Error, Result};

/// Buffered wake-up tokens per subscriber. Senders drop tokens when full.
const SUBSCRIBE_BUFFER: usize = 4;

/// Outcome of an enqueue request that passed validation.
#[derive(Debug)]
pub enum EnqueueOutcome {
    Created(Job),
    /// An identical request is already in flight within the dedupe TTL.
    Duplicate,
}

impl EnqueueOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, EnqueueOutcome::Duplicate)
    }
}

/// Durable, priority-ordered job queue backed by PostgreSQL.
#[derive(Clone)]
pub struct JobQueue {
    ctx: DbContext,
    cache: Arc<dyn Cache>,
}

impl JobQueue {
    pub fn new(ctx: DbContext, cache: Arc<dyn Cache>) -> Self {
        JobQueue { ctx, cache }
    }

    pub fn context(&self) -> &DbContext {
        &self.ctx
    }

    /// Insert a job after validating its priority range.
    pub async fn create(&self, new: NewJob) -> Result<Job> {
        validate_priority(new.priority)?;
        self.ctx.jobs().create(&new).await
    }

    /// Insert a job inside a caller-owned transaction.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        new: &NewJob,
    ) -> Result<Job> {
        validate_priority(new.priority)?;
        self.ctx.jobs().create_in_tx(tx, new).await
    }

    /// Enqueue a rules-evaluation job with cross-process dedupe.
    ///
    /// The payload's event ids are sorted and hashed into a dedupe key; a
    /// `set_if_not_exists` lock in the shared cache suppresses identical
    /// requests for two minutes. Cache failure degrades open: the job is
    /// enqueued without dedupe and a warning is logged.
    pub async fn enqueue_rules_job(
        &self,
        payload: &RulesJobPayload,
        priority: i32,
        is_test: bool,
    ) -> Result<EnqueueOutcome> {
        payload.validate()?;
        validate_priority(priority)?;

        let sorted_ids = payload.sorted_event_ids();
        let dedupe_key = keys::rules_job_dedupe(payload.site_id, &payload.scope, &sorted_ids);

        match self
            .cache
            .set_if_not_exists(&dedupe_key, b"1", keys::DEDUPE_TTL)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(site_id = %payload.site_id, scope = %payload.scope, "duplicate rules job suppressed");
                return Ok(EnqueueOutcome::Duplicate);
            }
            Err(e) => {
                warn!(error = %e, "dedupe lock unavailable; enqueueing without dedupe");
            }
        }

        let canonical = RulesJobPayload {
            event_ids: sorted_ids,
            site_id: payload.site_id,
            scope: payload.scope.clone(),
        };

        let mut new = NewJob::new(
            JobType::Rules,
            serde_json::to_value(&canonical).map_err(|e| Error::Internal(e.into()))?,
        );
        new.priority = priority;
        new.site_id = Some(payload.site_id);
        new.is_test = is_test;

        let job = self.ctx.jobs().create(&new).await?;
        Ok(EnqueueOutcome::Created(job))
    }

    /// Reserve the next job of a type under a lease.
    pub async fn reserve_next(&self, job_type: JobType, lease: Duration) -> Result<Job> {
        self.ctx.jobs().reserve_next(job_type, lease).await
    }

    pub async fn heartbeat(&self, job_id: Uuid, lease: Duration) -> Result<bool> {
        self.ctx.jobs().heartbeat(job_id, lease).await
    }

    pub async fn complete(&self, job_id: Uuid) -> Result<bool> {
        self.ctx.jobs().complete(job_id).await
    }

    pub async fn fail(&self, job_id: Uuid, message: &str) -> Result<bool> {
        self.ctx.jobs().fail(job_id, message).await
    }

    /// Fail with retry accounting; see [`JobOps::fail_with_details`].
    pub async fn fail_with_details(&self, job_id: Uuid, message: &str) -> Result<FailOutcome> {
        self.ctx.jobs().fail_with_details(job_id, message).await
    }

    /// Subscribe to insert notifications for a job type.
    ///
    /// The returned channel receives an empty token whenever any process
    /// inserts a job of this type. Tokens are dropped when the buffer is
    /// full; a token is a hint, not a unit of work.
    pub async fn subscribe(&self, job_type: JobType) -> Result<mpsc::Receiver<()>> {
        let mut listener = PgListener::connect_with(self.ctx.pool())
            .await
            .map_err(Error::from)?;
        let channel = notify_channel(job_type);
        listener.listen(&channel).await.map_err(Error::from)?;

        let (tx, rx) = mpsc::channel(SUBSCRIBE_BUFFER);
        tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(_) => match tx.try_send(()) {
                        Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
                        Err(mpsc::error::TrySendError::Closed(())) => break,
                    },
                    Err(e) => {
                        // PgListener re-establishes its connection on the
                        // next recv; pace the retry and keep listening.
                        warn!(channel = %channel, error = %e, "job notify listener error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        if tx.is_closed() {
                            break;
                        }
                    }
                }
            }
            debug!(channel = %channel, "job notify listener stopped");
        });

        Ok(rx)
    }

    pub async fn stats(&self) -> Result<Vec<JobStatRow>> {
        self.ctx.jobs().stats().await
    }

    pub async fn list(
        &self,
        job_type: Option<JobType>,
        status: Option<JobStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Job>> {
        self.ctx.jobs().list(job_type, status, limit, offset).await
    }

    pub async fn delete(&self, job_id: Uuid) -> Result<bool> {
        self.ctx.jobs().delete(job_id).await
    }

    pub async fn delete_by_payload_field(&self, field: &str, value: &str) -> Result<u64> {
        self.ctx.jobs().delete_by_payload_field(field, value).await
    }

    /// Cache a rules job's aggregated results for later inspection.
    pub async fn cache_results(&self, job_id: Uuid, results: &Value) -> Result<()> {
        let body = serde_json::to_vec(results).map_err(|e| Error::Internal(e.into()))?;
        self.cache
            .set(&keys::rules_results(job_id), &body, keys::RESULTS_TTL)
            .await
    }
}

fn validate_priority(priority: i32) -> Result<()> {
    if !(0..=100).contains(&priority) {
        return Err(Error::validation_field(
            "priority",
            format!("must be within 0..=100, got {priority}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_bounds_are_inclusive() {
        assert!(validate_priority(0).is_ok());
        assert!(validate_priority(100).is_ok());
        assert!(validate_priority(-1).is_err());
        assert!(validate_priority(101).is_err());
    }
}

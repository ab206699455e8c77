//! Job queue database operations with automatic event emission.
//!
//! Reservation uses `FOR UPDATE SKIP LOCKED` so any number of workers (in
//! any number of processes) can poll the queue concurrently. Cross-process
//! wake-up rides on `pg_notify`; the channel name is derived from the job
//! type so each runner listens only for its own work.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

use crate::data::models::{Job, JobStatus, JobType, OverrunStateMask};
use crate::db::DbContext;
use crate::error::{Error, Result};
use crate::events::{DomainEvent, JobEvent};

/// Notify channel for a job type.
pub fn notify_channel(job_type: JobType) -> String {
    format!("merrymaker_jobs_{}", job_type.as_str())
}

/// Fields for a new job row. Everything else takes table defaults.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub priority: i32,
    pub payload: Value,
    pub metadata: Value,
    pub site_id: Option<Uuid>,
    pub source_id: Option<Uuid>,
    pub is_test: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub max_retries: i32,
}

impl NewJob {
    pub fn new(job_type: JobType, payload: Value) -> Self {
        NewJob {
            job_type,
            priority: 50,
            payload,
            metadata: Value::Object(Default::default()),
            site_id: None,
            source_id: None,
            is_test: false,
            scheduled_at: None,
            max_retries: 3,
        }
    }
}

/// Outcome of a fail-with-retry transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Retries remained; job is pending again.
    Retried,
    /// Retries exhausted; job is terminally failed.
    Failed,
    /// The job was not running; nothing changed.
    NotRunning,
}

/// One row of the queue stats summary.
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct JobStatRow {
    pub job_type: JobType,
    pub status: JobStatus,
    pub count: i64,
}

/// Job queue operations.
pub struct JobOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> JobOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Insert a job and notify listeners of its type.
    ///
    /// Emits a `JobEvent::Created` event on success.
    pub async fn create(&self, new: &NewJob) -> Result<Job> {
        let mut tx = self.ctx.pool().begin().await?;
        let job = self.create_in_tx(&mut tx, new).await?;
        tx.commit().await?;

        self.ctx
            .events()
            .publish(DomainEvent::Job(JobEvent::Created {
                id: job.id,
                job_type: job.job_type,
            }));

        Ok(job)
    }

    /// Insert a job inside a caller-owned transaction.
    ///
    /// The `pg_notify` rides in the same transaction, so listeners only see
    /// the token once the insert commits. A fire-key collision surfaces as
    /// `Conflict(field = "scheduler.fire_key")`.
    pub async fn create_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        new: &NewJob,
    ) -> Result<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (
                job_type, priority, payload, metadata,
                site_id, source_id, is_test, scheduled_at, max_retries
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, COALESCE($8, NOW()), $9)
            RETURNING *
            "#,
        )
        .bind(new.job_type)
        .bind(new.priority)
        .bind(&new.payload)
        .bind(&new.metadata)
        .bind(new.site_id)
        .bind(new.source_id)
        .bind(new.is_test)
        .bind(new.scheduled_at)
        .bind(new.max_retries)
        .fetch_one(&mut **tx)
        .await
        .map_err(normalize_fire_key_conflict)?;

        sqlx::query("SELECT pg_notify($1, '')")
            .bind(notify_channel(new.job_type))
            .execute(&mut **tx)
            .await?;

        Ok(job)
    }

    /// Reserve the next available job of a type, taking a lease.
    ///
    /// Picks the highest-priority pending job with `scheduled_at <= NOW()`,
    /// tie-broken by `scheduled_at` then `created_at`. Running jobs whose
    /// lease has already expired are reclaimable too, as a fast path ahead
    /// of the reaper.
    ///
    /// Returns `Error::NoJobsAvailable` when the queue is empty. Emits a
    /// `JobEvent::Reserved` event on success.
    pub async fn reserve_next(&self, job_type: JobType, lease: Duration) -> Result<Job> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            WITH candidate AS (
                SELECT id FROM jobs
                WHERE job_type = $1
                  AND scheduled_at <= NOW()
                  AND (status = 'pending'
                       OR (status = 'running' AND lease_expires_at <= NOW()))
                ORDER BY priority DESC, scheduled_at ASC, created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs SET
                status = 'running',
                started_at = NOW(),
                lease_expires_at = NOW() + make_interval(secs => $2::double precision),
                updated_at = NOW()
            FROM candidate
            WHERE jobs.id = candidate.id
            RETURNING jobs.*
            "#,
        )
        .bind(job_type)
        .bind(lease.as_secs_f64())
        .fetch_optional(self.ctx.pool())
        .await?
        .ok_or(Error::NoJobsAvailable)?;

        self.ctx
            .events()
            .publish(DomainEvent::Job(JobEvent::Reserved {
                id: job.id,
                job_type: job.job_type,
            }));

        Ok(job)
    }

    /// Extend the lease of a still-running job.
    ///
    /// Returns false when the job is no longer running (completed, failed,
    /// or reclaimed), in which case the worker should abandon it.
    pub async fn heartbeat(&self, job_id: Uuid, lease: Duration) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                lease_expires_at = NOW() + make_interval(secs => $2::double precision),
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .bind(lease.as_secs_f64())
        .execute(self.ctx.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Transition a running job to completed. Idempotent: returns false when
    /// the job was not running.
    ///
    /// Emits a `JobEvent::Completed` event when the transition happened.
    pub async fn complete(&self, job_id: Uuid) -> Result<bool> {
        let row: Option<(JobType,)> = sqlx::query_as(
            r#"
            UPDATE jobs SET
                status = 'completed',
                completed_at = NOW(),
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING job_type
            "#,
        )
        .bind(job_id)
        .fetch_optional(self.ctx.pool())
        .await?;

        if let Some((job_type,)) = row {
            self.ctx
                .events()
                .publish(DomainEvent::Job(JobEvent::Completed {
                    id: job_id,
                    job_type,
                }));
            return Ok(true);
        }
        Ok(false)
    }

    /// Terminally fail a job regardless of remaining retries. Idempotent.
    pub async fn fail(&self, job_id: Uuid, message: &str) -> Result<bool> {
        let row: Option<(JobType,)> = sqlx::query_as(
            r#"
            UPDATE jobs SET
                status = 'failed',
                completed_at = NOW(),
                lease_expires_at = NULL,
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'running')
            RETURNING job_type
            "#,
        )
        .bind(job_id)
        .bind(message)
        .fetch_optional(self.ctx.pool())
        .await?;

        if let Some((job_type,)) = row {
            self.ctx.events().publish(DomainEvent::Job(JobEvent::Failed {
                id: job_id,
                job_type,
                will_retry: false,
            }));
            return Ok(true);
        }
        Ok(false)
    }

    /// Fail a running job, re-queueing it when retries remain.
    ///
    /// The retry decision is made atomically in the database: when
    /// `retry_count < max_retries` the job goes back to pending with
    /// `scheduled_at = NOW()`, otherwise it is terminally failed. Either way
    /// `retry_count` is incremented and `last_error` records this attempt.
    pub async fn fail_with_details(&self, job_id: Uuid, message: &str) -> Result<FailOutcome> {
        let row: Option<(JobStatus, JobType)> = sqlx::query_as(
            r#"
            UPDATE jobs SET
                status = CASE WHEN retry_count < max_retries
                              THEN 'pending'::job_status
                              ELSE 'failed'::job_status END,
                retry_count = retry_count + 1,
                scheduled_at = CASE WHEN retry_count < max_retries
                                    THEN NOW() ELSE scheduled_at END,
                started_at = CASE WHEN retry_count < max_retries
                                  THEN NULL ELSE started_at END,
                completed_at = CASE WHEN retry_count < max_retries
                                    THEN NULL ELSE NOW() END,
                lease_expires_at = NULL,
                last_error = $2,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING status, job_type
            "#,
        )
        .bind(job_id)
        .bind(message)
        .fetch_optional(self.ctx.pool())
        .await?;

        let Some((status, job_type)) = row else {
            return Ok(FailOutcome::NotRunning);
        };

        let will_retry = status == JobStatus::Pending;
        self.ctx.events().publish(DomainEvent::Job(JobEvent::Failed {
            id: job_id,
            job_type,
            will_retry,
        }));

        Ok(if will_retry {
            FailOutcome::Retried
        } else {
            FailOutcome::Failed
        })
    }

    pub async fn get_by_id(&self, job_id: Uuid) -> Result<Job> {
        sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(self.ctx.pool())
            .await?
            .ok_or(Error::not_found("job"))
    }

    /// Queue depth per (type, status).
    pub async fn stats(&self) -> Result<Vec<JobStatRow>> {
        let rows = sqlx::query_as::<_, JobStatRow>(
            "SELECT job_type, status, COUNT(*) AS count FROM jobs GROUP BY job_type, status",
        )
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    pub async fn list(
        &self,
        job_type: Option<JobType>,
        status: Option<JobStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM jobs
            WHERE ($1::job_type IS NULL OR job_type = $1)
              AND ($2::job_status IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(job_type)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    pub async fn delete(&self, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(job_id)
            .execute(self.ctx.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete non-running jobs whose payload field matches a value.
    pub async fn delete_by_payload_field(&self, field: &str, value: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE payload ->> $1 = $2 AND status <> 'running'",
        )
        .bind(field)
        .bind(value)
        .execute(self.ctx.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Terminally fail pending jobs older than `max_age`, up to `batch` rows.
    pub async fn fail_stale_pending(&self, max_age: Duration, batch: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'failed',
                completed_at = NOW(),
                last_error = 'stale: pending longer than threshold',
                updated_at = NOW()
            WHERE id IN (
                SELECT id FROM jobs
                WHERE status = 'pending'
                  AND created_at < NOW() - make_interval(secs => $1::double precision)
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(max_age.as_secs_f64())
        .bind(batch)
        .execute(self.ctx.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Recover running jobs whose lease expired, charging a retry.
    ///
    /// Jobs with retries remaining go back to pending; exhausted jobs fail.
    /// Either way `last_error` records the stale lease so the final attempt
    /// is attributable.
    pub async fn recover_expired_leases(&self, batch: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = CASE WHEN retry_count < max_retries
                              THEN 'pending'::job_status
                              ELSE 'failed'::job_status END,
                retry_count = retry_count + 1,
                scheduled_at = CASE WHEN retry_count < max_retries
                                    THEN NOW() ELSE scheduled_at END,
                started_at = CASE WHEN retry_count < max_retries
                                  THEN NULL ELSE started_at END,
                completed_at = CASE WHEN retry_count < max_retries
                                    THEN NULL ELSE NOW() END,
                lease_expires_at = NULL,
                last_error = 'stale lease expired; worker presumed dead',
                updated_at = NOW()
            WHERE id IN (
                SELECT id FROM jobs
                WHERE status = 'running' AND lease_expires_at <= NOW()
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(batch)
        .execute(self.ctx.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete terminal jobs older than `retention`, up to `batch` rows.
    pub async fn delete_old(
        &self,
        status: JobStatus,
        retention: Duration,
        batch: i64,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs WHERE id IN (
                SELECT id FROM jobs
                WHERE status = $1
                  AND completed_at < NOW() - make_interval(secs => $2::double precision)
                LIMIT $3
            )
            "#,
        )
        .bind(status)
        .bind(retention.as_secs_f64())
        .bind(batch)
        .execute(self.ctx.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Bitmask of in-flight job states for a scheduled task, used by the
    /// skip and reschedule overrun policies.
    pub async fn states_by_task_name(&self, task_name: &str) -> Result<OverrunStateMask> {
        let row: (Option<bool>, Option<bool>, Option<bool>) = sqlx::query_as(
            r#"
            SELECT
                bool_or(status = 'pending'),
                bool_or(status = 'running'
                        AND (lease_expires_at IS NULL OR lease_expires_at > NOW())),
                bool_or(status = 'running' AND lease_expires_at <= NOW())
            FROM jobs
            WHERE metadata ->> 'scheduler.task_name' = $1
              AND status IN ('pending', 'running')
            "#,
        )
        .bind(task_name)
        .fetch_one(self.ctx.pool())
        .await?;

        let mut mask = OverrunStateMask::empty();
        if row.0.unwrap_or(false) {
            mask |= OverrunStateMask::PENDING;
        }
        if row.1.unwrap_or(false) {
            mask |= OverrunStateMask::RUNNING;
        }
        if row.2.unwrap_or(false) {
            mask |= OverrunStateMask::OVERDUE;
        }
        Ok(mask)
    }

    /// Whether a job carrying this fire-key is still pending or running.
    pub async fn fire_key_in_flight(&self, fire_key: &str) -> Result<bool> {
        let (in_flight,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM jobs
                WHERE metadata ->> 'scheduler.fire_key' = $1
                  AND status IN ('pending', 'running')
            )
            "#,
        )
        .bind(fire_key)
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(in_flight)
    }
}

/// The partial unique index on the fire-key reports its constraint as
/// `jobs_scheduler_fire_key_idx`; surface the metadata key callers know.
fn normalize_fire_key_conflict(err: sqlx::Error) -> Error {
    let classified: Error = err.into();
    match classified {
        Error::Conflict { field, message } if field == "scheduler_fire_key" => Error::Conflict {
            field: "scheduler.fire_key".to_string(),
            message,
        },
        other => other,
    }
}

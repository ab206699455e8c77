//! Scheduled task repository.
//!
//! The scheduler claims due tasks inside a transaction under a per-task
//! advisory lock, so concurrent scheduler processes serialize per task
//! rather than per tick.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::data::models::{JobType, OverrunPolicy, ScheduledTask};
use crate::db::DbContext;
use crate::error::{Error, Result};

/// Registration payload for `upsert_by_task_name`.
#[derive(Debug, Clone)]
pub struct TaskRegistration {
    pub task_name: String,
    pub payload: Value,
    pub interval_secs: i64,
    pub overrun_policy: OverrunPolicy,
    pub overrun_state_mask: i32,
    pub priority: i32,
    pub max_retries: i32,
    pub default_job_type: JobType,
}

/// Advisory lock key for a task: a 64-bit hash of its name.
pub fn task_lock_key(task_name: &str) -> i64 {
    rapidhash::rapidhash(task_name.as_bytes()) as i64
}

pub struct ScheduledTaskOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> ScheduledTaskOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Create or update a task registration. `last_queued_at` survives
    /// updates so re-registration does not re-fire immediately.
    pub async fn upsert_by_task_name(&self, reg: &TaskRegistration) -> Result<ScheduledTask> {
        let task = sqlx::query_as::<_, ScheduledTask>(
            r#"
            INSERT INTO scheduled_tasks (
                task_name, payload, interval_secs, overrun_policy,
                overrun_state_mask, priority, max_retries, default_job_type
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (task_name) DO UPDATE SET
                payload = EXCLUDED.payload,
                interval_secs = EXCLUDED.interval_secs,
                overrun_policy = EXCLUDED.overrun_policy,
                overrun_state_mask = EXCLUDED.overrun_state_mask,
                priority = EXCLUDED.priority,
                max_retries = EXCLUDED.max_retries,
                default_job_type = EXCLUDED.default_job_type,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(&reg.task_name)
        .bind(&reg.payload)
        .bind(reg.interval_secs)
        .bind(reg.overrun_policy)
        .bind(reg.overrun_state_mask)
        .bind(reg.priority)
        .bind(reg.max_retries)
        .bind(reg.default_job_type)
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(task)
    }

    pub async fn delete_by_task_name(&self, task_name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scheduled_tasks WHERE task_name = $1")
            .bind(task_name)
            .execute(self.ctx.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get_by_task_name(&self, task_name: &str) -> Result<ScheduledTask> {
        sqlx::query_as::<_, ScheduledTask>("SELECT * FROM scheduled_tasks WHERE task_name = $1")
            .bind(task_name)
            .fetch_optional(self.ctx.pool())
            .await?
            .ok_or(Error::not_found("scheduled task"))
    }

    pub async fn list(&self) -> Result<Vec<ScheduledTask>> {
        let rows = sqlx::query_as::<_, ScheduledTask>(
            "SELECT * FROM scheduled_tasks ORDER BY task_name",
        )
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    /// Try to take the cross-process advisory lock for a task inside the
    /// given transaction. The lock releases automatically at commit/rollback.
    pub async fn try_task_lock(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task_name: &str,
    ) -> Result<bool> {
        let (locked,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_xact_lock($1)")
            .bind(task_lock_key(task_name))
            .fetch_one(&mut **tx)
            .await?;
        Ok(locked)
    }

    /// Snapshot of currently-due tasks, without locks. Candidates only;
    /// each is re-checked under its lock before anything is enqueued.
    pub async fn due_candidates(&self, batch: i64) -> Result<Vec<ScheduledTask>> {
        let rows = sqlx::query_as::<_, ScheduledTask>(
            r#"
            SELECT * FROM scheduled_tasks
            WHERE last_queued_at IS NULL
               OR last_queued_at
                  + make_interval(secs => interval_secs::double precision) <= NOW()
            ORDER BY last_queued_at ASC NULLS FIRST
            LIMIT $1
            "#,
        )
        .bind(batch)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    /// Re-fetch one task inside the transaction, row-locked, only if it is
    /// still due. SKIP LOCKED makes concurrent schedulers pass each other.
    pub async fn lock_due_task(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task_id: Uuid,
    ) -> Result<Option<ScheduledTask>> {
        let row = sqlx::query_as::<_, ScheduledTask>(
            r#"
            SELECT * FROM scheduled_tasks
            WHERE id = $1
              AND (last_queued_at IS NULL
                   OR last_queued_at
                      + make_interval(secs => interval_secs::double precision) <= NOW())
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(task_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row)
    }

    /// Record a successful enqueue: advance the cadence and pin the fire-key.
    pub async fn mark_queued(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task_id: Uuid,
        fire_key: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_tasks SET
                last_queued_at = NOW(),
                active_fire_key = $2,
                active_fire_key_set_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(fire_key)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Set `last_queued_at` without enqueueing (skip policy keeps cadence;
    /// reschedule policy backs off by half an interval).
    pub async fn set_last_queued(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE scheduled_tasks SET last_queued_at = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(task_id)
        .bind(at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Clear a task's `active_fire_key` when its job is no longer in flight.
    /// Returns true when the key was cleared (or was already clear).
    pub async fn clear_stale_fire_key(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task_id: Uuid,
    ) -> Result<bool> {
        let (clear,): (bool,) = sqlx::query_as(
            r#"
            WITH cleared AS (
                UPDATE scheduled_tasks SET
                    active_fire_key = NULL,
                    active_fire_key_set_at = NULL,
                    updated_at = NOW()
                WHERE id = $1
                  AND active_fire_key IS NOT NULL
                  AND NOT EXISTS (
                      SELECT 1 FROM jobs
                      WHERE jobs.metadata ->> 'scheduler.fire_key'
                            = scheduled_tasks.active_fire_key
                        AND jobs.status IN ('pending', 'running')
                  )
                RETURNING id
            )
            SELECT EXISTS (SELECT 1 FROM cleared)
                OR COALESCE(
                    (SELECT active_fire_key IS NULL FROM scheduled_tasks WHERE id = $1),
                    false
                )
            "#,
        )
        .bind(task_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(clear)
    }

    /// Clear `active_fire_key` where it still equals the finished job's key.
    /// Called by the runner when a scheduler-originated job reaches a
    /// terminal state.
    pub async fn release_fire_key(&self, task_name: &str, fire_key: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_tasks SET
                active_fire_key = NULL,
                active_fire_key_set_at = NULL,
                updated_at = NOW()
            WHERE task_name = $1 AND active_fire_key = $2
            "#,
        )
        .bind(task_name)
        .bind(fire_key)
        .execute(self.ctx.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

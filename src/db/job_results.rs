//! Job result repository.
//!
//! Results outlive their jobs (the FK nulls on job deletion) so delivery
//! attempts and rule-evaluation summaries stay inspectable after reaping.

use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

use crate::data::models::{JobResult, JobType};
use crate::db::DbContext;
use crate::error::{Error, Result};

pub struct JobResultOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> JobResultOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Insert or replace the result for a job. One result row per job.
    pub async fn upsert(&self, job_id: Uuid, job_type: JobType, result: &Value) -> Result<JobResult> {
        let row = sqlx::query_as::<_, JobResult>(
            r#"
            INSERT INTO job_results (job_id, job_type, result)
            VALUES ($1, $2, $3)
            ON CONFLICT (job_id) WHERE job_id IS NOT NULL
            DO UPDATE SET result = EXCLUDED.result, updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(job_type)
        .bind(result)
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(row)
    }

    pub async fn get_by_job_id(&self, job_id: Uuid) -> Result<JobResult> {
        sqlx::query_as::<_, JobResult>("SELECT * FROM job_results WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(self.ctx.pool())
            .await?
            .ok_or(Error::not_found("job result"))
    }

    /// Delivery results that carried a given alert.
    pub async fn find_by_alert_id(&self, alert_id: Uuid) -> Result<Vec<JobResult>> {
        let rows = sqlx::query_as::<_, JobResult>(
            r#"
            SELECT * FROM job_results
            WHERE result ->> 'alert_id' = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(alert_id.to_string())
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    /// Delete results of a job type older than `retention`, up to `batch`.
    pub async fn delete_old(
        &self,
        job_type: JobType,
        retention: Duration,
        batch: i64,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM job_results WHERE id IN (
                SELECT id FROM job_results
                WHERE job_type = $1
                  AND created_at < NOW() - make_interval(secs => $2::double precision)
                LIMIT $3
            )
            "#,
        )
        .bind(job_type)
        .bind(retention.as_secs_f64())
        .bind(batch)
        .execute(self.ctx.pool())
        .await?;
        Ok(result.rows_affected())
    }
}

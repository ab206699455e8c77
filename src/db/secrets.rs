//! Secret repository.
//!
//! Values are opaque here; resolution and redaction live in
//! `crate::secrets`. Secret values never appear in logs or events.

use std::collections::HashMap;
use uuid::Uuid;

use crate::data::models::{RefreshStatus, Secret};
use crate::db::DbContext;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct NewSecret {
    pub name: String,
    pub value: String,
    pub provider_script_path: Option<String>,
    pub refresh_interval_secs: Option<i64>,
    pub refresh_enabled: bool,
}

pub struct SecretOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> SecretOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, new: &NewSecret) -> Result<Secret> {
        let secret = sqlx::query_as::<_, Secret>(
            r#"
            INSERT INTO secrets (
                name, value, provider_script_path, refresh_interval_secs, refresh_enabled
            ) VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(&new.name)
        .bind(&new.value)
        .bind(&new.provider_script_path)
        .bind(new.refresh_interval_secs)
        .bind(new.refresh_enabled)
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(secret)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Secret> {
        sqlx::query_as::<_, Secret>("SELECT * FROM secrets WHERE id = $1")
            .bind(id)
            .fetch_optional(self.ctx.pool())
            .await?
            .ok_or(Error::not_found("secret"))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Secret> {
        sqlx::query_as::<_, Secret>("SELECT * FROM secrets WHERE name = $1")
            .bind(name)
            .fetch_optional(self.ctx.pool())
            .await?
            .ok_or(Error::not_found("secret"))
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Secret>> {
        let rows = sqlx::query_as::<_, Secret>(
            "SELECT * FROM secrets ORDER BY name LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    /// Fetch values for a set of names, for placeholder resolution.
    pub async fn values_by_names(&self, names: &[String]) -> Result<HashMap<String, String>> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, value FROM secrets WHERE name = ANY($1)")
                .bind(names)
                .fetch_all(self.ctx.pool())
                .await?;
        Ok(rows.into_iter().collect())
    }

    pub async fn update_value(&self, id: Uuid, value: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE secrets SET value = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(value)
                .execute(self.ctx.pool())
                .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("secret"));
        }
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM secrets WHERE id = $1")
            .bind(id)
            .execute(self.ctx.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Secrets with refresh enabled whose interval has elapsed (or that have
    /// never refreshed). Marked `pending` as they are claimed so concurrent
    /// refresh sweeps do not double-run them.
    pub async fn claim_due_for_refresh(&self, limit: i64) -> Result<Vec<Secret>> {
        let rows = sqlx::query_as::<_, Secret>(
            r#"
            UPDATE secrets SET
                last_refresh_status = 'pending',
                updated_at = NOW()
            WHERE id IN (
                SELECT id FROM secrets
                WHERE refresh_enabled
                  AND (last_refresh_status IS DISTINCT FROM 'pending')
                  AND (last_refreshed_at IS NULL
                       OR last_refreshed_at
                          + make_interval(secs => refresh_interval_secs::double precision)
                          <= NOW())
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(limit)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    /// Record a successful refresh: swap in the new value.
    pub async fn record_refresh_success(&self, id: Uuid, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE secrets SET
                value = $2,
                last_refreshed_at = NOW(),
                last_refresh_status = 'success',
                last_refresh_error = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(value)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }

    /// Record a failed refresh. The previous value is kept.
    pub async fn record_refresh_failure(&self, id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE secrets SET
                last_refreshed_at = NOW(),
                last_refresh_status = 'failed',
                last_refresh_error = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }

    pub async fn set_refresh_status(&self, id: Uuid, status: RefreshStatus) -> Result<()> {
        sqlx::query(
            "UPDATE secrets SET last_refresh_status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .execute(self.ctx.pool())
        .await?;
        Ok(())
    }
}

//! Monitored site repository.

use uuid::Uuid;

use crate::data::models::{AlertMode, Site};
use crate::db::DbContext;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct NewSite {
    pub name: String,
    pub source_id: Uuid,
    pub run_every_minutes: i32,
    pub enabled: bool,
    pub alert_mode: AlertMode,
    pub scope: String,
    pub http_alert_sink_id: Option<Uuid>,
}

pub struct SiteOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> SiteOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, new: &NewSite) -> Result<Site> {
        let site = sqlx::query_as::<_, Site>(
            r#"
            INSERT INTO sites (
                name, source_id, run_every_minutes, enabled,
                alert_mode, scope, http_alert_sink_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(&new.name)
        .bind(new.source_id)
        .bind(new.run_every_minutes)
        .bind(new.enabled)
        .bind(new.alert_mode)
        .bind(&new.scope)
        .bind(new.http_alert_sink_id)
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(site)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Site> {
        sqlx::query_as::<_, Site>("SELECT * FROM sites WHERE id = $1")
            .bind(id)
            .fetch_optional(self.ctx.pool())
            .await?
            .ok_or(Error::not_found("site"))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Site> {
        sqlx::query_as::<_, Site>("SELECT * FROM sites WHERE name = $1")
            .bind(name)
            .fetch_optional(self.ctx.pool())
            .await?
            .ok_or(Error::not_found("site"))
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Site>> {
        let rows =
            sqlx::query_as::<_, Site>("SELECT * FROM sites ORDER BY name LIMIT $1 OFFSET $2")
                .bind(limit)
                .bind(offset)
                .fetch_all(self.ctx.pool())
                .await?;
        Ok(rows)
    }

    /// Enabled sites whose cadence makes them due for a browser run.
    pub async fn due_for_run(&self, limit: i64) -> Result<Vec<Site>> {
        let rows = sqlx::query_as::<_, Site>(
            r#"
            SELECT * FROM sites
            WHERE enabled
              AND (last_run IS NULL
                   OR last_run + make_interval(mins => run_every_minutes) <= NOW())
            ORDER BY last_run ASC NULLS FIRST
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    pub async fn update(&self, site: &Site) -> Result<Site> {
        sqlx::query_as::<_, Site>(
            r#"
            UPDATE sites SET
                name = $2, source_id = $3, run_every_minutes = $4, enabled = $5,
                alert_mode = $6, scope = $7, http_alert_sink_id = $8,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(site.id)
        .bind(&site.name)
        .bind(site.source_id)
        .bind(site.run_every_minutes)
        .bind(site.enabled)
        .bind(site.alert_mode)
        .bind(&site.scope)
        .bind(site.http_alert_sink_id)
        .fetch_optional(self.ctx.pool())
        .await?
        .ok_or(Error::not_found("site"))
    }

    pub async fn touch_last_run(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE sites SET last_run = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(self.ctx.pool())
            .await?;
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sites WHERE id = $1")
            .bind(id)
            .execute(self.ctx.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

//! Source script repository.

use uuid::Uuid;

use crate::cache::{Cache, keys};
use crate::data::models::Source;
use crate::db::DbContext;
use crate::error::{Error, Result};
use crate::secrets::resolve_placeholders;

#[derive(Debug, Clone)]
pub struct NewSource {
    pub name: String,
    pub body: String,
    pub is_test: bool,
    /// Names of secrets the source body references.
    pub secret_names: Vec<String>,
}

pub struct SourceOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> SourceOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Insert a source and link its referenced secrets.
    pub async fn create(&self, new: &NewSource) -> Result<Source> {
        let mut tx = self.ctx.pool().begin().await?;

        let source = sqlx::query_as::<_, Source>(
            "INSERT INTO sources (name, body, is_test) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(&new.name)
        .bind(&new.body)
        .bind(new.is_test)
        .fetch_one(&mut *tx)
        .await?;

        for secret_name in &new.secret_names {
            sqlx::query(
                r#"
                INSERT INTO source_secrets (source_id, secret_id)
                SELECT $1, id FROM secrets WHERE name = $2
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(source.id)
            .bind(secret_name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(source)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Source> {
        sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE id = $1")
            .bind(id)
            .fetch_optional(self.ctx.pool())
            .await?
            .ok_or(Error::not_found("source"))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Source> {
        sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE name = $1")
            .bind(name)
            .fetch_optional(self.ctx.pool())
            .await?
            .ok_or(Error::not_found("source"))
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Source>> {
        let rows = sqlx::query_as::<_, Source>(
            "SELECT * FROM sources ORDER BY name LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    pub async fn update_body(&self, id: Uuid, body: &str) -> Result<Source> {
        sqlx::query_as::<_, Source>(
            "UPDATE sources SET body = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(body)
        .fetch_optional(self.ctx.pool())
        .await?
        .ok_or(Error::not_found("source"))
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sources WHERE id = $1")
            .bind(id)
            .execute(self.ctx.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// The source body with its secret placeholders resolved, cached for
    /// thirty minutes.
    ///
    /// This is the form the browser instrumentation executes; it must never
    /// be persisted or logged, only served.
    pub async fn resolved_body(&self, cache: &dyn Cache, source_id: Uuid) -> Result<String> {
        let key = keys::source_content(source_id);
        if let Some(cached) = cache.get(&key).await? {
            return String::from_utf8(cached)
                .map_err(|e| Error::Internal(e.into()));
        }

        let source = self.get_by_id(source_id).await?;
        let names = self.secret_names(source_id).await?;
        let values = self.ctx.secrets().values_by_names(&names).await?;
        let resolved = resolve_placeholders(&names, &values, &source.body)?;

        cache
            .set(&key, resolved.as_bytes(), keys::SOURCE_CONTENT_TTL)
            .await?;
        Ok(resolved)
    }

    /// Names of the secrets a source references, for placeholder resolution.
    pub async fn secret_names(&self, source_id: Uuid) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT s.name FROM secrets s
            JOIN source_secrets ss ON ss.secret_id = s.id
            WHERE ss.source_id = $1
            ORDER BY s.name
            "#,
        )
        .bind(source_id)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}

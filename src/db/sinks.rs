//! HTTP alert sink repository.

use serde_json::Value;
use uuid::Uuid;

use crate::data::models::{HttpAlertSink, SinkMethod};
use crate::db::DbContext;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct NewSink {
    pub name: String,
    pub uri: String,
    pub method: SinkMethod,
    pub body: Option<String>,
    pub query_params: Option<String>,
    pub headers: Option<Value>,
    pub ok_status: i32,
    pub retry: i32,
    pub secret_names: Vec<String>,
}

pub struct SinkOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> SinkOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, new: &NewSink) -> Result<HttpAlertSink> {
        let mut tx = self.ctx.pool().begin().await?;

        let sink = sqlx::query_as::<_, HttpAlertSink>(
            r#"
            INSERT INTO http_alert_sinks (
                name, uri, method, body, query_params, headers, ok_status, retry
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(&new.name)
        .bind(&new.uri)
        .bind(new.method)
        .bind(&new.body)
        .bind(&new.query_params)
        .bind(&new.headers)
        .bind(new.ok_status)
        .bind(new.retry)
        .fetch_one(&mut *tx)
        .await?;

        for secret_name in &new.secret_names {
            sqlx::query(
                r#"
                INSERT INTO sink_secrets (sink_id, secret_id)
                SELECT $1, id FROM secrets WHERE name = $2
                ON CONFLICT DO NOTHING
                "#,
            )
            .bind(sink.id)
            .bind(secret_name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(sink)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<HttpAlertSink> {
        sqlx::query_as::<_, HttpAlertSink>("SELECT * FROM http_alert_sinks WHERE id = $1")
            .bind(id)
            .fetch_optional(self.ctx.pool())
            .await?
            .ok_or(Error::not_found("http alert sink"))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<HttpAlertSink> {
        sqlx::query_as::<_, HttpAlertSink>("SELECT * FROM http_alert_sinks WHERE name = $1")
            .bind(name)
            .fetch_optional(self.ctx.pool())
            .await?
            .ok_or(Error::not_found("http alert sink"))
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<HttpAlertSink>> {
        let rows = sqlx::query_as::<_, HttpAlertSink>(
            "SELECT * FROM http_alert_sinks ORDER BY name LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM http_alert_sinks WHERE id = $1")
            .bind(id)
            .execute(self.ctx.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Names of the secrets a sink's templates reference.
    pub async fn secret_names(&self, sink_id: Uuid) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT s.name FROM secrets s
            JOIN sink_secrets ss ON ss.secret_id = s.id
            WHERE ss.sink_id = $1
            ORDER BY s.name
            "#,
        )
        .bind(sink_id)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}

//! Indicator-of-compromise repository.

use uuid::Uuid;

use crate::data::models::{Ioc, IocType};
use crate::db::DbContext;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct NewIoc {
    pub ioc_type: IocType,
    pub value: String,
    pub enabled: bool,
    pub description: Option<String>,
}

pub struct IocOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> IocOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    pub async fn create(&self, new: &NewIoc) -> Result<Ioc> {
        let ioc = sqlx::query_as::<_, Ioc>(
            r#"
            INSERT INTO iocs (ioc_type, value, enabled, description)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(new.ioc_type)
        .bind(&new.value)
        .bind(new.enabled)
        .bind(&new.description)
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(ioc)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Ioc> {
        sqlx::query_as::<_, Ioc>("SELECT * FROM iocs WHERE id = $1")
            .bind(id)
            .fetch_optional(self.ctx.pool())
            .await?
            .ok_or(Error::not_found("ioc"))
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Ioc>> {
        let rows = sqlx::query_as::<_, Ioc>(
            "SELECT * FROM iocs ORDER BY value LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM iocs WHERE id = $1")
            .bind(id)
            .execute(self.ctx.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Match a host against enabled indicators: fqdn values compare
    /// case-insensitively, ip values exactly.
    pub async fn lookup_host(&self, host: &str) -> Result<Option<Ioc>> {
        let row = sqlx::query_as::<_, Ioc>(
            r#"
            SELECT * FROM iocs
            WHERE enabled
              AND ((ioc_type = 'fqdn' AND lower(value) = lower($1))
                   OR (ioc_type = 'ip' AND value = $1))
            LIMIT 1
            "#,
        )
        .bind(host)
        .fetch_optional(self.ctx.pool())
        .await?;
        Ok(row)
    }
}

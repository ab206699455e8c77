//! Seen-domain repository.

use uuid::Uuid;

use crate::data::models::SeenDomain;
use crate::db::DbContext;
use crate::error::Result;

pub struct SeenDomainOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> SeenDomainOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Atomic first-sighting upsert.
    ///
    /// Inserts with `hit_count = 1`, or bumps `hit_count` and `last_seen_at`
    /// on conflict. The returned row's `hit_count` tells the caller whether
    /// the domain was new (`1`) or already seen (`> 1`).
    pub async fn record_seen(&self, site_id: Uuid, scope: &str, domain: &str) -> Result<SeenDomain> {
        let row = sqlx::query_as::<_, SeenDomain>(
            r#"
            INSERT INTO seen_domains (site_id, scope, domain)
            VALUES ($1, $2, $3)
            ON CONFLICT (site_id, domain, scope) DO UPDATE SET
                hit_count = seen_domains.hit_count + 1,
                last_seen_at = NOW()
            RETURNING *
            "#,
        )
        .bind(site_id)
        .bind(scope)
        .bind(domain)
        .fetch_one(self.ctx.pool())
        .await?;
        Ok(row)
    }

    pub async fn lookup(
        &self,
        site_id: Uuid,
        domain: &str,
        scope: &str,
    ) -> Result<Option<SeenDomain>> {
        let row = sqlx::query_as::<_, SeenDomain>(
            "SELECT * FROM seen_domains WHERE site_id = $1 AND domain = $2 AND scope = $3",
        )
        .bind(site_id)
        .bind(domain)
        .bind(scope)
        .fetch_optional(self.ctx.pool())
        .await?;
        Ok(row)
    }
}

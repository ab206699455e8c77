//! Alert repository.

use serde_json::Value;
use uuid::Uuid;

use crate::data::models::{Alert, DeliveryStatus, RuleType, Severity};
use crate::db::DbContext;
use crate::error::{Error, Result};
use crate::events::{AlertEvent, DomainEvent};

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub site_id: Uuid,
    pub rule_type: RuleType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub event_context: Value,
    pub metadata: Value,
    pub delivery_status: DeliveryStatus,
}

pub struct AlertOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> AlertOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Insert an alert. Emits an `AlertEvent::Fired` event.
    pub async fn create(&self, new: &NewAlert) -> Result<Alert> {
        let mut tx = self.ctx.pool().begin().await?;
        let alert = self.create_in_tx(&mut tx, new).await?;
        tx.commit().await?;
        Ok(alert)
    }

    /// Insert an alert inside a caller-owned transaction.
    ///
    /// The `Fired` event is published immediately; callers only pass a
    /// transaction they are about to commit.
    pub async fn create_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        new: &NewAlert,
    ) -> Result<Alert> {
        let alert = sqlx::query_as::<_, Alert>(
            r#"
            INSERT INTO alerts (
                site_id, rule_type, severity, title, description,
                event_context, metadata, delivery_status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(new.site_id)
        .bind(new.rule_type)
        .bind(new.severity)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.event_context)
        .bind(&new.metadata)
        .bind(new.delivery_status)
        .fetch_one(&mut **tx)
        .await?;

        self.ctx
            .events()
            .publish(DomainEvent::Alert(AlertEvent::Fired {
                id: alert.id,
                site_id: alert.site_id,
                rule_type: alert.rule_type,
            }));

        Ok(alert)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Alert> {
        sqlx::query_as::<_, Alert>("SELECT * FROM alerts WHERE id = $1")
            .bind(id)
            .fetch_optional(self.ctx.pool())
            .await?
            .ok_or(Error::not_found("alert"))
    }

    pub async fn list_for_site(&self, site_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Alert>> {
        let rows = sqlx::query_as::<_, Alert>(
            r#"
            SELECT * FROM alerts
            WHERE site_id = $1
            ORDER BY fired_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(site_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    /// Move an alert's delivery status. Emits the matching alert event.
    pub async fn set_delivery_status(&self, id: Uuid, status: DeliveryStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE alerts SET delivery_status = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .execute(self.ctx.pool())
        .await?;

        let transitioned = result.rows_affected() == 1;
        if transitioned {
            match status {
                DeliveryStatus::Dispatched => {
                    self.ctx
                        .events()
                        .publish(DomainEvent::Alert(AlertEvent::Dispatched { id }));
                }
                DeliveryStatus::Failed => {
                    self.ctx
                        .events()
                        .publish(DomainEvent::Alert(AlertEvent::DeliveryFailed { id }));
                }
                DeliveryStatus::Pending | DeliveryStatus::Muted => {}
            }
        }
        Ok(transitioned)
    }

    /// Resolve an alert, recording who resolved it.
    pub async fn resolve(&self, id: Uuid, resolved_by: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE alerts SET resolved_at = NOW(), resolved_by = $2
            WHERE id = $1 AND resolved_at IS NULL
            "#,
        )
        .bind(id)
        .bind(resolved_by)
        .execute(self.ctx.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

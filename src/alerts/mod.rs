//! Alert service: creation, muting, and delivery scheduling.
//!
//! Active alerts are persisted and their delivery job enqueued in one
//! transaction, so an alert row either has its job or is terminal. Delivery
//! itself happens in the alert-job handler; the queue's retry accounting
//! gives at-least-once semantics with `max_retries` taken from the sink.

pub mod sink;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::data::models::{Alert, DeliveryStatus, HttpAlertSink, Job, JobType};
use crate::data::payloads::AlertJobPayload;
use crate::db::DbContext;
use crate::db::alerts::NewAlert;
use crate::db::jobs::NewJob;
use crate::error::{Error, Result};
use crate::queue::JobQueue;
use crate::rules::AlertResolver;

/// What `dispatch` did for an alert.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A delivery job was created.
    Scheduled(Box<Job>),
    /// The alert's site has no sink configured; nothing to deliver.
    NoSink,
}

#[derive(Clone)]
pub struct AlertService {
    ctx: DbContext,
    queue: JobQueue,
}

impl AlertService {
    pub fn new(ctx: DbContext, queue: JobQueue) -> Self {
        AlertService { ctx, queue }
    }

    /// Persist an alert and, for deliverable ones, schedule its delivery.
    ///
    /// Muted alerts are persisted with `delivery_status = muted` and no job.
    /// Pending alerts get their delivery job in the same transaction as the
    /// alert row. A site without a sink yields a pending alert and a log
    /// notice, not an error.
    pub async fn create(&self, new: &NewAlert) -> Result<Alert> {
        if new.delivery_status != DeliveryStatus::Pending {
            return self.ctx.alerts().create(new).await;
        }

        let site = self.ctx.sites().get_by_id(new.site_id).await?;
        let Some(sink_id) = site.http_alert_sink_id else {
            let alert = self.ctx.alerts().create(new).await?;
            debug!(alert_id = %alert.id, site = %site.name, "site has no alert sink; delivery skipped");
            return Ok(alert);
        };
        let sink = self.ctx.sinks().get_by_id(sink_id).await?;

        let mut tx = self.ctx.pool().begin().await?;
        let alert = self.ctx.alerts().create_in_tx(&mut tx, new).await?;

        let alert_json =
            serde_json::to_value(&alert).map_err(|e| Error::Internal(e.into()))?;
        let new_job = delivery_job(&sink, alert_json)?;
        self.queue.create_in_tx(&mut tx, &new_job).await?;
        tx.commit().await?;

        Ok(alert)
    }

    /// Schedule delivery for an already-persisted alert.
    ///
    /// Used by re-dispatch paths; `create` schedules new alerts itself.
    pub async fn dispatch(&self, alert: &Alert) -> Result<DispatchOutcome> {
        let site = self.ctx.sites().get_by_id(alert.site_id).await?;
        let Some(sink_id) = site.http_alert_sink_id else {
            debug!(alert_id = %alert.id, site = %site.name, "site has no alert sink");
            return Ok(DispatchOutcome::NoSink);
        };
        let sink = self.ctx.sinks().get_by_id(sink_id).await?;

        let alert_json =
            serde_json::to_value(alert).map_err(|e| Error::Internal(e.into()))?;
        let job = self.queue.create(delivery_job(&sink, alert_json)?).await?;
        Ok(DispatchOutcome::Scheduled(Box::new(job)))
    }

    /// Record the terminal delivery outcome on the alert row.
    pub async fn record_delivery(&self, alert_id: uuid::Uuid, delivered: bool) -> Result<()> {
        let status = if delivered {
            DeliveryStatus::Dispatched
        } else {
            DeliveryStatus::Failed
        };
        if !self.ctx.alerts().set_delivery_status(alert_id, status).await? {
            warn!(alert_id = %alert_id, "alert missing while recording delivery outcome");
        }
        Ok(())
    }
}

/// Build the delivery job for a sink/alert pair.
fn delivery_job(sink: &HttpAlertSink, alert_json: Value) -> Result<NewJob> {
    let payload = AlertJobPayload {
        sink_id: sink.id,
        payload: alert_json,
    };
    let mut job = NewJob::new(
        JobType::Alert,
        serde_json::to_value(&payload).map_err(|e| Error::Internal(e.into()))?,
    );
    job.max_retries = sink.retry;
    Ok(job)
}

#[async_trait]
impl AlertResolver for AlertService {
    async fn create_alert(&self, new: NewAlert) -> Result<Alert> {
        self.create(&new).await
    }
}

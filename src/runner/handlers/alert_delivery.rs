//! Alert delivery handler: the single outbound HTTP attempt per job run.
//!
//! Every attempt upserts a redacted request/response summary into
//! `job_results` before the success judgement, so failed deliveries stay
//! inspectable. Retry pacing is the queue's job; this handler only reports
//! success or failure for one attempt.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::alerts::AlertService;
use crate::alerts::sink::{
    self, BODY_PERSIST_LIMIT, PreparedHttpRequest, RequestSummary, truncate_utf8,
};
use crate::data::models::{Job, JobType};
use crate::data::payloads::AlertJobPayload;
use crate::db::DbContext;
use crate::error::Error;
use crate::runner::{HandlerOutcome, JobHandler};

/// Redacted, bounded snapshot of the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSummary {
    pub status_code: u16,
    pub body: String,
    pub body_truncated: bool,
}

/// The persisted result of one delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDeliveryJobResult {
    pub alert_id: Option<Uuid>,
    pub sink_id: Uuid,
    pub attempt: i32,
    pub duration_ms: u64,
    pub request: RequestSummary,
    pub response: Option<ResponseSummary>,
    pub delivered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct AlertDeliveryHandler {
    ctx: DbContext,
    alerts: AlertService,
    client: reqwest::Client,
}

impl AlertDeliveryHandler {
    pub fn new(ctx: DbContext, alerts: AlertService, client: reqwest::Client) -> Self {
        AlertDeliveryHandler {
            ctx,
            alerts,
            client,
        }
    }

    async fn send(
        &self,
        prepared: &PreparedHttpRequest,
    ) -> Result<(u16, String, bool), reqwest::Error> {
        let mut request = self
            .client
            .request(prepared.method.as_reqwest(), &prepared.url);
        for (name, value) in &prepared.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &prepared.body {
            request = request.body(body.clone());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        let truncated = body.len() > BODY_PERSIST_LIMIT;
        Ok((status, truncate_utf8(&body, BODY_PERSIST_LIMIT), truncated))
    }
}

#[async_trait]
impl JobHandler for AlertDeliveryHandler {
    fn component(&self) -> &'static str {
        "alert_delivery"
    }

    async fn handle(&self, job: &Job) -> anyhow::Result<HandlerOutcome> {
        let payload: AlertJobPayload = serde_json::from_value(job.payload.clone())?;
        let sink = self.ctx.sinks().get_by_id(payload.sink_id).await?;

        let alert_id = payload
            .payload
            .get("id")
            .and_then(|id| id.as_str())
            .and_then(|id| Uuid::parse_str(id).ok());

        let prepared = sink::prepare_request(&self.ctx, &sink, &payload.payload).await?;
        let redactor = sink::sink_redactor(&self.ctx, &sink).await?;
        let request_summary = sink::redacted_request_summary(&prepared, &redactor);

        let attempt = job.retry_count + 1;
        let final_attempt = job.retry_count >= job.max_retries;
        let started = Instant::now();

        let (response, error) = match self.send(&prepared).await {
            Ok((status_code, body, body_truncated)) => (
                Some(ResponseSummary {
                    status_code,
                    body: redactor.redact_str(&body),
                    body_truncated,
                }),
                None,
            ),
            Err(e) => (None, Some(e.to_string())),
        };

        let delivered = response
            .as_ref()
            .is_some_and(|r| i32::from(r.status_code) == sink.ok_status);

        let result = AlertDeliveryJobResult {
            alert_id,
            sink_id: sink.id,
            attempt,
            duration_ms: started.elapsed().as_millis() as u64,
            request: request_summary,
            response,
            delivered,
            error: error.clone(),
        };
        self.ctx
            .job_results()
            .upsert(job.id, JobType::Alert, &serde_json::to_value(&result)?)
            .await?;

        if delivered {
            if let Some(alert_id) = alert_id {
                self.alerts.record_delivery(alert_id, true).await?;
            }
            debug!(job_id = %job.id, sink = %sink.name, attempt, "alert delivered");
            return Ok(HandlerOutcome::Success);
        }

        // Out of attempts after this one: settle the alert as failed.
        if final_attempt {
            if let Some(alert_id) = alert_id {
                self.alerts.record_delivery(alert_id, false).await?;
            }
        }

        match (&result.response, error) {
            (Some(response), _) => {
                warn!(
                    job_id = %job.id,
                    sink = %sink.name,
                    attempt,
                    status = response.status_code,
                    ok_status = sink.ok_status,
                    "alert delivery status mismatch"
                );
                Err(Error::validation(format!(
                    "delivery status mismatch: got {} expected {}",
                    response.status_code, sink.ok_status
                ))
                .into())
            }
            (None, Some(error)) => {
                warn!(job_id = %job.id, sink = %sink.name, attempt, error = %error, "alert delivery request failed");
                Err(anyhow::anyhow!("delivery request failed: {error}"))
            }
            (None, None) => unreachable!("no response and no error"),
        }
    }
}

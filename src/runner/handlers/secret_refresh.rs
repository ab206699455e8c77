//! Secret refresh handler.
//!
//! A job payload naming a secret refreshes that one; an empty payload is a
//! sweep that claims everything due. Failed fetches keep the prior value
//! and mark the secret `failed`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::data::models::{Job, Secret};
use crate::data::payloads::SecretRefreshPayload;
use crate::db::DbContext;
use crate::runner::{HandlerOutcome, JobHandler};
use crate::secrets::SecretValueProvider;

/// Secrets claimed per sweep run.
const SWEEP_BATCH: i64 = 50;

pub struct SecretRefreshHandler {
    ctx: DbContext,
    provider: Arc<dyn SecretValueProvider>,
}

impl SecretRefreshHandler {
    pub fn new(ctx: DbContext, provider: Arc<dyn SecretValueProvider>) -> Self {
        SecretRefreshHandler { ctx, provider }
    }

    async fn refresh_one(&self, secret: &Secret) -> bool {
        match self.provider.fetch(secret).await {
            Ok(value) => {
                if let Err(e) = self
                    .ctx
                    .secrets()
                    .record_refresh_success(secret.id, &value)
                    .await
                {
                    warn!(secret = %secret.name, error = %e, "failed to record refresh success");
                    return false;
                }
                info!(secret = %secret.name, "secret refreshed");
                true
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(record_err) = self
                    .ctx
                    .secrets()
                    .record_refresh_failure(secret.id, &message)
                    .await
                {
                    warn!(secret = %secret.name, error = %record_err, "failed to record refresh failure");
                }
                warn!(secret = %secret.name, error = %message, "secret refresh failed");
                false
            }
        }
    }
}

#[async_trait]
impl JobHandler for SecretRefreshHandler {
    fn component(&self) -> &'static str {
        "secret_refresh"
    }

    async fn handle(&self, job: &Job) -> anyhow::Result<HandlerOutcome> {
        // Targeted refresh.
        if job.payload.get("secret_id").is_some() {
            let payload: SecretRefreshPayload = serde_json::from_value(job.payload.clone())?;
            let secret = self.ctx.secrets().get_by_id(payload.secret_id).await?;
            if !secret.refresh_enabled {
                return Ok(HandlerOutcome::Noop);
            }
            return if self.refresh_one(&secret).await {
                Ok(HandlerOutcome::Success)
            } else {
                Err(anyhow::anyhow!("refresh failed for secret '{}'", secret.name))
            };
        }

        // Sweep: refresh everything due.
        let due = self.ctx.secrets().claim_due_for_refresh(SWEEP_BATCH).await?;
        if due.is_empty() {
            return Ok(HandlerOutcome::Noop);
        }

        let mut failures = 0usize;
        for secret in &due {
            if !self.refresh_one(secret).await {
                failures += 1;
            }
        }
        info!(total = due.len(), failures, "secret refresh sweep finished");

        if failures > 0 {
            Err(anyhow::anyhow!("{failures}/{} secret refreshes failed", due.len()))
        } else {
            Ok(HandlerOutcome::Success)
        }
    }
}

//! Rules job handler: load events, run the pipeline, persist results.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::data::models::{Job, JobType};
use crate::data::payloads::RulesJobPayload;
use crate::db::DbContext;
use crate::queue::JobQueue;
use crate::rules::RulePipeline;
use crate::runner::{HandlerOutcome, JobHandler};

pub struct RulesJobHandler {
    ctx: DbContext,
    queue: JobQueue,
    pipeline: Arc<RulePipeline>,
}

impl RulesJobHandler {
    pub fn new(ctx: DbContext, queue: JobQueue, pipeline: Arc<RulePipeline>) -> Self {
        RulesJobHandler {
            ctx,
            queue,
            pipeline,
        }
    }
}

#[async_trait]
impl JobHandler for RulesJobHandler {
    fn component(&self) -> &'static str {
        "rules"
    }

    async fn handle(&self, job: &Job) -> anyhow::Result<HandlerOutcome> {
        let payload: RulesJobPayload = serde_json::from_value(job.payload.clone())?;
        payload.validate()?;

        let site = self.ctx.sites().get_by_id(payload.site_id).await?;
        let events = self
            .ctx
            .browser_events()
            .fetch_by_ids(&payload.event_ids)
            .await?;
        if events.is_empty() {
            debug!(job_id = %job.id, "no events remain for rules job");
            return Ok(HandlerOutcome::Noop);
        }

        // Test jobs evaluate without side effects: would-alert lists instead
        // of alert rows.
        let dry_run = job.is_test;

        let results = self
            .pipeline
            .run(
                &events,
                site.id,
                &payload.scope,
                dry_run,
                site.alert_mode,
                job.id,
            )
            .await;

        let results_json = serde_json::to_value(&results)?;
        self.ctx
            .job_results()
            .upsert(job.id, JobType::Rules, &results_json)
            .await?;
        if let Err(e) = self.queue.cache_results(job.id, &results_json).await {
            warn!(job_id = %job.id, error = %e, "failed to cache rule results");
        }

        let consumed: Vec<_> = events.iter().map(|event| event.id).collect();
        self.ctx.browser_events().mark_processed(&consumed).await?;

        Ok(HandlerOutcome::Success)
    }
}

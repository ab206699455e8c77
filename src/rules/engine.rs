//! The pipeline driver.

use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::data::models::{AlertMode, Event};
use crate::rules::context::{DomainExtractor, EventContext, RuleWorkItem};
use crate::rules::results::ProcessingResults;
use crate::rules::Rule;

/// Hard cap on event ids evaluated per rules job. Oversized batches are
/// truncated with a log message rather than rejected.
pub const MAX_EVENT_BATCH: usize = 500;

/// Ordered collection of rules plus the domain extraction seam.
pub struct RulePipeline {
    rules: IndexMap<&'static str, Arc<dyn Rule>>,
    extractor: Arc<dyn DomainExtractor>,
}

impl RulePipeline {
    pub fn new(extractor: Arc<dyn DomainExtractor>) -> Self {
        RulePipeline {
            rules: IndexMap::new(),
            extractor,
        }
    }

    /// Register a rule. Rules run in registration order; re-registering an
    /// id replaces the rule but keeps its position.
    pub fn register(&mut self, rule: Arc<dyn Rule>) {
        self.rules.insert(rule.id(), rule);
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.keys().copied().collect()
    }

    /// Evaluate a batch of events for one site/scope.
    pub async fn run(
        &self,
        events: &[Event],
        site_id: Uuid,
        scope: &str,
        dry_run: bool,
        alert_mode: AlertMode,
        job_id: Uuid,
    ) -> ProcessingResults {
        let started = Instant::now();
        let mut results = ProcessingResults::new(dry_run, alert_mode);

        let events = if events.len() > MAX_EVENT_BATCH {
            warn!(
                job_id = %job_id,
                total = events.len(),
                cap = MAX_EVENT_BATCH,
                "event batch exceeds cap; truncating"
            );
            &events[..MAX_EVENT_BATCH]
        } else {
            events
        };

        for event in events {
            let context = EventContext::from_event(event);

            let Some(domain) = self.extractor.extract(&context) else {
                results.events_skipped.record(&event.event_type);
                continue;
            };
            results.domains_processed.record(&domain);

            let item = RuleWorkItem {
                event_id: event.id,
                event_type: event.event_type.clone(),
                context,
                domain,
                site_id,
                scope: scope.to_string(),
                dry_run,
                alert_mode,
                job_id,
            };

            for rule in self.rules.values() {
                let outcome = rule.evaluate(&item).await;
                if let Some(error) = outcome.error {
                    results.errors_encountered.record(&item.domain);
                    warn!(
                        job_id = %job_id,
                        rule = outcome.rule_id,
                        domain = %item.domain,
                        error = %error,
                        "rule evaluation error"
                    );
                }
                if let Some(apply) = outcome.apply {
                    apply(&mut results);
                }
            }
        }

        results.processing_time_ms = started.elapsed().as_millis() as u64;
        debug!(
            job_id = %job_id,
            events = events.len(),
            domains = results.domains_processed.count,
            alerts = results.alerts_created.count,
            elapsed_ms = results.processing_time_ms,
            "rule pipeline finished"
        );
        results
    }
}

//! Rule pipeline: ordered evaluators over browser events.
//!
//! Rules are records with an id and an `evaluate` that returns an optional
//! apply closure; the engine is a thin driver that extracts a work item per
//! event, runs rules in registration order, and folds apply closures into
//! one aggregated [`ProcessingResults`]. Side effects (alert rows, seen
//! upserts, dedupe tokens) happen inside `evaluate`; closures only mutate
//! the results record.

pub mod context;
pub mod engine;
pub mod ioc;
pub mod payload_signature;
pub mod results;
pub mod unknown_domain;

use async_trait::async_trait;

pub use context::{DomainExtractor, EventContext, RuleWorkItem, UrlDomainExtractor};
pub use engine::RulePipeline;
pub use results::{ProcessingResults, SampleBucket};

use crate::data::models::Alert;
use crate::db::alerts::NewAlert;
use crate::error::Result;

/// Mutation applied to the aggregated results after a rule evaluates.
pub type ApplyFn = Box<dyn FnOnce(&mut ProcessingResults) + Send>;

/// What one rule produced for one work item.
pub struct RuleOutcome {
    pub rule_id: &'static str,
    pub apply: Option<ApplyFn>,
    pub error: Option<anyhow::Error>,
}

impl RuleOutcome {
    pub fn noop(rule_id: &'static str) -> Self {
        RuleOutcome {
            rule_id,
            apply: None,
            error: None,
        }
    }

    pub fn apply(rule_id: &'static str, apply: ApplyFn) -> Self {
        RuleOutcome {
            rule_id,
            apply: Some(apply),
            error: None,
        }
    }

    pub fn error(rule_id: &'static str, error: anyhow::Error, apply: Option<ApplyFn>) -> Self {
        RuleOutcome {
            rule_id,
            apply,
            error: Some(error),
        }
    }
}

/// One detection rule.
#[async_trait]
pub trait Rule: Send + Sync {
    fn id(&self) -> &'static str;
    async fn evaluate(&self, item: &RuleWorkItem) -> RuleOutcome;
}

/// Creates alert rows on behalf of rules.
///
/// Implemented by the alert service; the pipeline never talks to the alert
/// tables directly, so tests can observe or stub alert creation.
#[async_trait]
pub trait AlertResolver: Send + Sync {
    async fn create_alert(&self, new: NewAlert) -> Result<Alert>;
}

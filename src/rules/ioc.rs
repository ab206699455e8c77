//! Known indicator-of-compromise rule.
//!
//! Matches the event's domain against the IOC table. A match is a hard
//! signal, so there is no allow-list or seen-domain suppression in front of
//! it; only dry-run mode withholds the alert row.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::data::models::{AlertMode, DeliveryStatus, RuleType, Severity};
use crate::db::DbContext;
use crate::db::alerts::NewAlert;
use crate::rules::{AlertResolver, Rule, RuleOutcome, RuleWorkItem};

const RULE_ID: &str = "ioc_domain";

pub struct IocRule {
    ctx: DbContext,
    alerts: Arc<dyn AlertResolver>,
}

impl IocRule {
    pub fn new(ctx: DbContext, alerts: Arc<dyn AlertResolver>) -> Self {
        IocRule { ctx, alerts }
    }
}

#[async_trait]
impl Rule for IocRule {
    fn id(&self) -> &'static str {
        RULE_ID
    }

    async fn evaluate(&self, item: &RuleWorkItem) -> RuleOutcome {
        let domain = item.domain.clone();

        let ioc = match self.ctx.iocs().lookup_host(&domain).await {
            Ok(Some(ioc)) => ioc,
            Ok(None) => return RuleOutcome::noop(RULE_ID),
            Err(e) => return RuleOutcome::error(RULE_ID, e.into(), None),
        };

        if item.dry_run {
            return RuleOutcome::apply(
                RULE_ID,
                Box::new(move |results| {
                    results.ioc_host_matches.record(&domain);
                    results.ioc.matches_dry_run.record(&domain);
                    results.would_alert_ioc_push(&domain);
                }),
            );
        }

        let delivery_status = match item.alert_mode {
            AlertMode::Active => DeliveryStatus::Pending,
            AlertMode::Muted => DeliveryStatus::Muted,
        };
        let new_alert = NewAlert {
            site_id: item.site_id,
            rule_type: RuleType::IocDomain,
            severity: Severity::High,
            title: format!("Known indicator contacted: {domain}"),
            description: ioc
                .description
                .clone()
                .unwrap_or_else(|| format!("{domain} matches a known {} indicator.", ioc.ioc_type.label())),
            event_context: json!({
                "event_id": item.event_id,
                "event_type": item.event_type,
                "request_url": item.context.request_url,
                "referer": item.context.referer,
            }),
            metadata: json!({
                "domain": domain,
                "scope": item.scope,
                "ioc_id": ioc.id,
                "job_id": item.job_id,
            }),
            delivery_status,
        };

        match self.alerts.create_alert(new_alert).await {
            Ok(_) => {
                let muted = item.alert_mode == AlertMode::Muted;
                RuleOutcome::apply(
                    RULE_ID,
                    Box::new(move |results| {
                        results.ioc_host_matches.record(&domain);
                        results.ioc.matches.record(&domain);
                        if muted {
                            results.ioc.alerts_muted.record(&domain);
                        } else {
                            results.ioc.alerts.record(&domain);
                            results.alerts_created.record(&domain);
                        }
                    }),
                )
            }
            Err(e) => RuleOutcome::error(RULE_ID, e.into(), None),
        }
    }
}

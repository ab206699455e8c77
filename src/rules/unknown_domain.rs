//! Unknown-domain rule.
//!
//! A domain never seen before for a (site, scope) — and not allow-listed —
//! raises an alert. The suppression chain runs cheapest-first: local
//! allow-list hints, the shared seen-domain hint, the authoritative
//! database upsert, then the cross-process alert-once token.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use crate::cache::{Cache, LocalCache, keys};
use crate::data::models::{AlertMode, DeliveryStatus, RuleType, Severity};
use crate::db::DbContext;
use crate::db::alerts::NewAlert;
use crate::rules::context::referer_domain;
use crate::rules::{AlertResolver, ApplyFn, Rule, RuleOutcome, RuleWorkItem};

const RULE_ID: &str = "unknown_domain";

/// Alert-once throttle window for repeated unknown-domain hits.
const ALERT_ONCE_TTL: Duration = Duration::from_secs(60 * 60);

/// Allow-list hint cache bounds. Hints only ever short-circuit toward
/// suppression; the database stays authoritative.
const ALLOW_HINT_CAPACITY: usize = 2048;
const ALLOW_HINT_TTL: Duration = Duration::from_secs(60);

pub struct UnknownDomainRule {
    ctx: DbContext,
    cache: Arc<dyn Cache>,
    alerts: Arc<dyn AlertResolver>,
    allow_hints: LocalCache,
}

impl UnknownDomainRule {
    pub fn new(ctx: DbContext, cache: Arc<dyn Cache>, alerts: Arc<dyn AlertResolver>) -> Self {
        UnknownDomainRule {
            ctx,
            cache,
            alerts,
            allow_hints: LocalCache::new(ALLOW_HINT_CAPACITY, ALLOW_HINT_TTL),
        }
    }

    /// Allow-list check for one domain: local hint, then database.
    async fn is_allowlisted(&self, hint_key: &str, domain: &str, scope: &str) -> crate::error::Result<bool> {
        if self.allow_hints.exists(hint_key) {
            return Ok(true);
        }
        let entries = self.ctx.allowlist().get_for_scope(domain, scope).await?;
        if entries.is_empty() {
            return Ok(false);
        }
        self.allow_hints.set(hint_key, b"1".to_vec(), None);
        Ok(true)
    }
}

fn record_error(domain: String) -> ApplyFn {
    Box::new(move |results| results.unknown_domain.errors.record(&domain))
}

#[async_trait]
impl Rule for UnknownDomainRule {
    fn id(&self) -> &'static str {
        RULE_ID
    }

    async fn evaluate(&self, item: &RuleWorkItem) -> RuleOutcome {
        let domain = item.domain.clone();

        // Hosts that do not re-parse as a URL host are malformed input, not
        // unknown domains.
        if url::Url::parse(&format!("https://{domain}/")).is_err() {
            return RuleOutcome::apply(
                RULE_ID,
                Box::new(move |results| {
                    results.unknown_domain.normalization_failed.record(&domain)
                }),
            );
        }

        // Allow-list: the domain itself.
        let hint_key = format!("{}|{}", item.scope, domain);
        match self.is_allowlisted(&hint_key, &domain, &item.scope).await {
            Ok(true) => {
                return RuleOutcome::apply(
                    RULE_ID,
                    Box::new(move |results| {
                        results.unknown_domain.suppressed_allowlist.record(&domain)
                    }),
                );
            }
            Ok(false) => {}
            Err(e) => return RuleOutcome::error(RULE_ID, e.into(), Some(record_error(domain))),
        }

        // Allow-list: the referring page. A request launched from an
        // allow-listed origin is suppressed with the pair key so hints for
        // the pair are independent of the bare domain.
        if let Some(referer) = referer_domain(&item.context) {
            let pair_key = format!("{}|{}|{}", item.scope, domain, referer);
            match self.is_allowlisted(&pair_key, &referer, &item.scope).await {
                Ok(true) => {
                    return RuleOutcome::apply(
                        RULE_ID,
                        Box::new(move |results| {
                            results.unknown_domain.suppressed_allowlist.record(&domain)
                        }),
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    return RuleOutcome::error(RULE_ID, e.into(), Some(record_error(domain)));
                }
            }
        }

        // Seen-domain: shared hint first, then the authoritative upsert.
        let seen_key = keys::seen_domain(item.site_id, &item.scope, &domain);
        match self.cache.get(&seen_key).await {
            Ok(Some(_)) => {
                return RuleOutcome::apply(
                    RULE_ID,
                    Box::new(move |results| {
                        results.unknown_domain.suppressed_seen.record(&domain)
                    }),
                );
            }
            Ok(None) => {}
            Err(e) => {
                // Hint miss only; the database decides below.
                warn!(error = %e, "seen-domain hint unavailable; falling back to database");
            }
        }

        let seen = match self
            .ctx
            .seen_domains()
            .record_seen(item.site_id, &item.scope, &domain)
            .await
        {
            Ok(row) => row,
            Err(e) => return RuleOutcome::error(RULE_ID, e.into(), Some(record_error(domain))),
        };

        // Bump the shared hint as part of the seen check, for both outcomes.
        if let Err(e) = self.cache.set(&seen_key, b"1", keys::SEEN_TTL).await {
            warn!(error = %e, "failed to bump seen-domain hint");
        }

        if seen.hit_count > 1 {
            return RuleOutcome::apply(
                RULE_ID,
                Box::new(move |results| results.unknown_domain.suppressed_seen.record(&domain)),
            );
        }

        // The domain is genuinely unknown from here on.
        let unknown_domain = domain.clone();

        // Alert-once: one alert per (scope, domain) per window, across all
        // processes. Muted alerts consume the token too, so un-muting a
        // site does not re-fire everything it throttled.
        let once_key = keys::alert_once(&item.scope, "unknown", &domain);
        match self.cache.set_if_not_exists(&once_key, b"1", ALERT_ONCE_TTL).await {
            Ok(true) => {}
            Ok(false) => {
                return RuleOutcome::apply(
                    RULE_ID,
                    Box::new(move |results| {
                        results.unknown_domains.record(&unknown_domain);
                        results.unknown_domain.suppressed_dedupe.record(&unknown_domain);
                    }),
                );
            }
            Err(e) => {
                warn!(error = %e, "alert-once lock unavailable; proceeding without dedupe");
            }
        }

        if item.dry_run {
            return RuleOutcome::apply(
                RULE_ID,
                Box::new(move |results| {
                    results.unknown_domains.record(&unknown_domain);
                    results.unknown_domain.alerted_dry_run.record(&unknown_domain);
                    results.would_alert_unknown_push(&unknown_domain);
                }),
            );
        }

        let delivery_status = match item.alert_mode {
            AlertMode::Active => DeliveryStatus::Pending,
            AlertMode::Muted => DeliveryStatus::Muted,
        };
        let new_alert = NewAlert {
            site_id: item.site_id,
            rule_type: RuleType::UnknownDomain,
            severity: Severity::Medium,
            title: format!("Unknown domain contacted: {domain}"),
            description: format!(
                "The site contacted {domain}, which has no allow-list entry and has \
                 not been seen before in scope '{}'.",
                item.scope
            ),
            event_context: json!({
                "event_id": item.event_id,
                "event_type": item.event_type,
                "request_url": item.context.request_url,
                "referer": item.context.referer,
                "attribution_url": item.context.attribution_url,
                "user_agent": item.context.user_agent,
            }),
            metadata: json!({ "domain": domain, "scope": item.scope, "job_id": item.job_id }),
            delivery_status,
        };

        match self.alerts.create_alert(new_alert).await {
            Ok(_) => {
                let muted = item.alert_mode == AlertMode::Muted;
                RuleOutcome::apply(
                    RULE_ID,
                    Box::new(move |results| {
                        results.unknown_domains.record(&unknown_domain);
                        if muted {
                            results.unknown_domain.alerted_muted.record(&unknown_domain);
                        } else {
                            results.unknown_domain.alerted.record(&unknown_domain);
                            results.alerts_created.record(&unknown_domain);
                        }
                    }),
                )
            }
            Err(e) => RuleOutcome::error(RULE_ID, e.into(), Some(record_error(domain))),
        }
    }
}

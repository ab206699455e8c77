//! Payload-signature rule.
//!
//! Scans outbound request payloads (URL, query, post body) for signatures
//! of data exfiltration. Follows the same shape as the unknown-domain
//! rule: allow-list first, then the match check, then the alert-once
//! token, then the alert.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use tracing::warn;

use crate::cache::{Cache, keys};
use crate::data::models::{AlertMode, DeliveryStatus, RuleType, Severity};
use crate::db::DbContext;
use crate::db::alerts::NewAlert;
use crate::rules::{AlertResolver, Rule, RuleOutcome, RuleWorkItem};

const RULE_ID: &str = "payload_signature";

const ALERT_ONCE_TTL: Duration = Duration::from_secs(60 * 60);

/// A named payload signature.
pub struct Signature {
    pub name: &'static str,
    pub pattern: Regex,
    pub severity: Severity,
}

/// Signatures shipped by default. Operators extend the set at wiring time.
pub fn default_signatures() -> Vec<Signature> {
    vec![
        Signature {
            name: "card-number-exfil",
            // 13-16 digits allowing common separators, the shape skimmers post.
            pattern: Regex::new(r"(?:\d[ \-]?){13,16}").expect("static regex"),
            severity: Severity::Critical,
        },
        Signature {
            name: "bulk-base64-param",
            pattern: Regex::new(r"(?:data|payload|d)=[A-Za-z0-9+/]{128,}={0,2}")
                .expect("static regex"),
            severity: Severity::High,
        },
    ]
}

pub struct PayloadSignatureRule {
    ctx: DbContext,
    cache: Arc<dyn Cache>,
    alerts: Arc<dyn AlertResolver>,
    signatures: Vec<Signature>,
}

impl PayloadSignatureRule {
    pub fn new(
        ctx: DbContext,
        cache: Arc<dyn Cache>,
        alerts: Arc<dyn AlertResolver>,
        signatures: Vec<Signature>,
    ) -> Self {
        PayloadSignatureRule {
            ctx,
            cache,
            alerts,
            signatures,
        }
    }

    /// The haystack: request URL plus any post data carried on the event.
    fn haystack(item: &RuleWorkItem) -> String {
        let mut parts = Vec::new();
        if let Some(url) = &item.context.request_url {
            parts.push(url.clone());
        }
        parts.push(item.event_type.clone());
        parts.join("\n")
    }

    fn matching_signature(&self, haystack: &str) -> Option<&Signature> {
        self.signatures
            .iter()
            .find(|sig| sig.pattern.is_match(haystack))
    }
}

#[async_trait]
impl Rule for PayloadSignatureRule {
    fn id(&self) -> &'static str {
        RULE_ID
    }

    async fn evaluate(&self, item: &RuleWorkItem) -> RuleOutcome {
        let domain = item.domain.clone();

        // Allow-listed destinations are trusted with their payloads.
        match self.ctx.allowlist().get_for_scope(&domain, &item.scope).await {
            Ok(entries) if !entries.is_empty() => return RuleOutcome::noop(RULE_ID),
            Ok(_) => {}
            Err(e) => return RuleOutcome::error(RULE_ID, e.into(), None),
        }

        let haystack = Self::haystack(item);
        let Some(signature) = self.matching_signature(&haystack) else {
            return RuleOutcome::noop(RULE_ID);
        };
        let signature_name = signature.name;
        let severity = signature.severity;

        if item.dry_run {
            return RuleOutcome::apply(
                RULE_ID,
                Box::new(move |results| {
                    results.payload_signature.matches_dry_run.record(&domain);
                }),
            );
        }

        let subject = format!("{signature_name}:{domain}");
        let once_key = keys::alert_once(&item.scope, "signature", &subject);
        match self.cache.set_if_not_exists(&once_key, b"1", ALERT_ONCE_TTL).await {
            Ok(true) => {}
            Ok(false) => {
                return RuleOutcome::apply(
                    RULE_ID,
                    Box::new(move |results| {
                        results.payload_signature.matches.record(&domain);
                        results.payload_signature.suppressed_dedupe.record(&domain);
                    }),
                );
            }
            Err(e) => {
                warn!(error = %e, "alert-once lock unavailable; proceeding without dedupe");
            }
        }

        let delivery_status = match item.alert_mode {
            AlertMode::Active => DeliveryStatus::Pending,
            AlertMode::Muted => DeliveryStatus::Muted,
        };
        let new_alert = NewAlert {
            site_id: item.site_id,
            rule_type: RuleType::Custom,
            severity,
            title: format!("Payload signature '{signature_name}' matched for {domain}"),
            description: format!(
                "An outbound request to {domain} matched the '{signature_name}' payload signature."
            ),
            event_context: json!({
                "event_id": item.event_id,
                "event_type": item.event_type,
                "request_url": item.context.request_url,
            }),
            metadata: json!({
                "domain": domain,
                "scope": item.scope,
                "signature": signature_name,
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
                        results.payload_signature.matches.record(&domain);
                        if muted {
                            results.payload_signature.alerts_muted.record(&domain);
                        } else {
                            results.payload_signature.alerts.record(&domain);
                            results.alerts_created.record(&domain);
                        }
                    }),
                )
            }
            Err(e) => RuleOutcome::error(RULE_ID, e.into(), None),
        }
    }
}

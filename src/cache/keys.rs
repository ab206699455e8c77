//! Cache key namespaces and TTLs used by the rule layer.

use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

/// Rules-job enqueue dedupe lock.
pub const DEDUPE_TTL: Duration = Duration::from_secs(2 * 60);
/// Seen-domain hint.
pub const SEEN_TTL: Duration = Duration::from_secs(60 * 60);
/// Resolved source body.
pub const SOURCE_CONTENT_TTL: Duration = Duration::from_secs(30 * 60);
/// Rule-evaluation result record.
pub const RESULTS_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// `rules:dedupe:rules_job:site:<id>:scope:<s>:events:<hex(sha256(sorted ids))>`
pub fn rules_job_dedupe(site_id: Uuid, scope: &str, sorted_event_ids: &[Uuid]) -> String {
    let mut hasher = Sha256::new();
    for (i, id) in sorted_event_ids.iter().enumerate() {
        if i > 0 {
            hasher.update(b",");
        }
        hasher.update(id.to_string().as_bytes());
    }
    let digest = hasher.finalize();
    format!(
        "rules:dedupe:rules_job:site:{site_id}:scope:{scope}:events:{}",
        hex(&digest)
    )
}

/// `rules:seen:site:<id>:scope:<s>:domain:<d>`
pub fn seen_domain(site_id: Uuid, scope: &str, domain: &str) -> String {
    format!("rules:seen:site:{site_id}:scope:{scope}:domain:{domain}")
}

/// `rules:alertonce:scope:<s>:key:<rule>:<subject>`
pub fn alert_once(scope: &str, rule: &str, subject: &str) -> String {
    format!("rules:alertonce:scope:{scope}:key:{rule}:{subject}")
}

/// `source:content:<id>`
pub fn source_content(source_id: Uuid) -> String {
    format!("source:content:{source_id}")
}

/// `rules:results:<job_id>`
pub fn rules_results(job_id: Uuid) -> String {
    format!("rules:results:{job_id}")
}

/// Parsed form of an alert-once key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertOnceKey<'a> {
    pub scope: &'a str,
    pub rule: &'a str,
    /// May itself contain colons.
    pub subject: &'a str,
}

/// Parse `rules:alertonce:scope:<scope>:key:<rule>:<subject>`.
///
/// The subject is everything after the rule's trailing colon, so subjects
/// with embedded colons round-trip.
pub fn parse_alert_once(key: &str) -> Option<AlertOnceKey<'_>> {
    let rest = key.strip_prefix("rules:alertonce:scope:")?;
    let (scope, rest) = rest.split_once(":key:")?;
    let (rule, subject) = rest.split_once(':')?;
    if scope.is_empty() || rule.is_empty() || subject.is_empty() {
        return None;
    }
    Some(AlertOnceKey {
        scope,
        rule,
        subject,
    })
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_key_is_stable_for_same_sorted_ids() {
        let site = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut ids = vec![a, b];
        ids.sort();

        let first = rules_job_dedupe(site, "default", &ids);
        let second = rules_job_dedupe(site, "default", &ids);
        assert_eq!(first, second);
        assert!(first.starts_with(&format!("rules:dedupe:rules_job:site:{site}:scope:default:events:")));
    }

    #[test]
    fn dedupe_key_differs_across_scopes() {
        let site = Uuid::new_v4();
        let ids = vec![Uuid::new_v4()];
        assert_ne!(
            rules_job_dedupe(site, "default", &ids),
            rules_job_dedupe(site, "staging", &ids)
        );
    }

    #[test]
    fn alert_once_round_trips() {
        let key = alert_once("default", "unknown", "evil.example.test");
        let parsed = parse_alert_once(&key).expect("should parse");
        assert_eq!(parsed.scope, "default");
        assert_eq!(parsed.rule, "unknown");
        assert_eq!(parsed.subject, "evil.example.test");
    }

    #[test]
    fn alert_once_subject_keeps_embedded_colons() {
        let key = alert_once("default", "ioc", "host:8443:path");
        let parsed = parse_alert_once(&key).expect("should parse");
        assert_eq!(parsed.rule, "ioc");
        assert_eq!(parsed.subject, "host:8443:path");
    }

    #[test]
    fn malformed_keys_do_not_parse() {
        assert!(parse_alert_once("rules:alertonce:scope:s:key:rule").is_none());
        assert!(parse_alert_once("rules:seen:site:x").is_none());
        assert!(parse_alert_once("").is_none());
    }
}

//! Aggregated rule-evaluation results.
//!
//! Every counter is a sample bucket: a count plus at most ten unique
//! example subjects, compared case-insensitively. Buckets keep result
//! payloads small while staying diagnosable; merges sum counts and union
//! samples up to the cap.

use serde::{Deserialize, Serialize};

use crate::data::models::AlertMode;

/// Maximum unique samples retained per bucket.
pub const MAX_SAMPLES: usize = 10;

/// A counter with a bounded, de-duplicated list of example subjects.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SampleBucket {
    pub count: u64,
    pub samples: Vec<String>,
}

impl SampleBucket {
    /// Count an occurrence and sample its subject.
    pub fn record(&mut self, subject: &str) {
        self.count += 1;
        self.sample(subject);
    }

    /// Count an occurrence without a subject.
    pub fn increment(&mut self) {
        self.count += 1;
    }

    fn sample(&mut self, subject: &str) {
        if self.samples.len() >= MAX_SAMPLES {
            return;
        }
        let duplicate = self
            .samples
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(subject));
        if !duplicate {
            self.samples.push(subject.to_string());
        }
    }

    /// Arithmetic sum of counts; union of samples up to the cap.
    pub fn merge(&mut self, other: &SampleBucket) {
        self.count += other.count;
        for subject in &other.samples {
            self.sample(subject);
        }
    }
}

/// Per-outcome buckets for the unknown-domain rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UnknownDomainStats {
    pub alerted: SampleBucket,
    pub alerted_dry_run: SampleBucket,
    pub alerted_muted: SampleBucket,
    pub suppressed_allowlist: SampleBucket,
    pub suppressed_seen: SampleBucket,
    pub suppressed_dedupe: SampleBucket,
    pub normalization_failed: SampleBucket,
    pub errors: SampleBucket,
}

impl UnknownDomainStats {
    pub fn merge(&mut self, other: &UnknownDomainStats) {
        self.alerted.merge(&other.alerted);
        self.alerted_dry_run.merge(&other.alerted_dry_run);
        self.alerted_muted.merge(&other.alerted_muted);
        self.suppressed_allowlist.merge(&other.suppressed_allowlist);
        self.suppressed_seen.merge(&other.suppressed_seen);
        self.suppressed_dedupe.merge(&other.suppressed_dedupe);
        self.normalization_failed.merge(&other.normalization_failed);
        self.errors.merge(&other.errors);
    }
}

/// Per-outcome buckets for the IOC rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IocStats {
    pub matches: SampleBucket,
    pub matches_dry_run: SampleBucket,
    pub alerts: SampleBucket,
    pub alerts_muted: SampleBucket,
}

impl IocStats {
    pub fn merge(&mut self, other: &IocStats) {
        self.matches.merge(&other.matches);
        self.matches_dry_run.merge(&other.matches_dry_run);
        self.alerts.merge(&other.alerts);
        self.alerts_muted.merge(&other.alerts_muted);
    }
}

/// Per-outcome buckets for the payload-signature rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SignatureStats {
    pub matches: SampleBucket,
    pub matches_dry_run: SampleBucket,
    pub alerts: SampleBucket,
    pub alerts_muted: SampleBucket,
    pub suppressed_dedupe: SampleBucket,
}

impl SignatureStats {
    pub fn merge(&mut self, other: &SignatureStats) {
        self.matches.merge(&other.matches);
        self.matches_dry_run.merge(&other.matches_dry_run);
        self.alerts.merge(&other.alerts);
        self.alerts_muted.merge(&other.alerts_muted);
        self.suppressed_dedupe.merge(&other.suppressed_dedupe);
    }
}

/// Aggregated record for one rules-job evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResults {
    pub alerts_created: SampleBucket,
    pub domains_processed: SampleBucket,
    pub events_skipped: SampleBucket,
    pub unknown_domains: SampleBucket,
    pub ioc_host_matches: SampleBucket,
    pub errors_encountered: SampleBucket,
    pub processing_time_ms: u64,
    pub is_dry_run: bool,
    pub alert_mode: AlertMode,
    pub would_alert_unknown: Vec<String>,
    pub would_alert_ioc: Vec<String>,
    pub unknown_domain: UnknownDomainStats,
    pub ioc: IocStats,
    pub payload_signature: SignatureStats,
}

impl ProcessingResults {
    pub fn new(is_dry_run: bool, alert_mode: AlertMode) -> Self {
        ProcessingResults {
            alerts_created: SampleBucket::default(),
            domains_processed: SampleBucket::default(),
            events_skipped: SampleBucket::default(),
            unknown_domains: SampleBucket::default(),
            ioc_host_matches: SampleBucket::default(),
            errors_encountered: SampleBucket::default(),
            processing_time_ms: 0,
            is_dry_run,
            alert_mode,
            would_alert_unknown: Vec::new(),
            would_alert_ioc: Vec::new(),
            unknown_domain: UnknownDomainStats::default(),
            ioc: IocStats::default(),
            payload_signature: SignatureStats::default(),
        }
    }

    /// Append to a would-alert list, bounded and de-duplicated like samples.
    pub fn would_alert_unknown_push(&mut self, domain: &str) {
        push_bounded(&mut self.would_alert_unknown, domain);
    }

    pub fn would_alert_ioc_push(&mut self, domain: &str) {
        push_bounded(&mut self.would_alert_ioc, domain);
    }

    /// Merge another result record into this one.
    pub fn merge(&mut self, other: &ProcessingResults) {
        self.alerts_created.merge(&other.alerts_created);
        self.domains_processed.merge(&other.domains_processed);
        self.events_skipped.merge(&other.events_skipped);
        self.unknown_domains.merge(&other.unknown_domains);
        self.ioc_host_matches.merge(&other.ioc_host_matches);
        self.errors_encountered.merge(&other.errors_encountered);
        self.processing_time_ms += other.processing_time_ms;
        for domain in &other.would_alert_unknown {
            push_bounded(&mut self.would_alert_unknown, domain);
        }
        for domain in &other.would_alert_ioc {
            push_bounded(&mut self.would_alert_ioc, domain);
        }
        self.unknown_domain.merge(&other.unknown_domain);
        self.ioc.merge(&other.ioc);
        self.payload_signature.merge(&other.payload_signature);
    }
}

fn push_bounded(list: &mut Vec<String>, subject: &str) {
    if list.len() >= MAX_SAMPLES {
        return;
    }
    if !list.iter().any(|s| s.eq_ignore_ascii_case(subject)) {
        list.push(subject.to_string());
    }
}

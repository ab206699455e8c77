//! Row models and database enums.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The type of work a job row carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Browser,
    Rules,
    Alert,
    SecretRefresh,
}

impl JobType {
    /// Stable lowercase name, used for notify channels and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Browser => "browser",
            JobType::Rules => "rules",
            JobType::Alert => "alert",
            JobType::SecretRefresh => "secret_refresh",
        }
    }

    pub const ALL: [JobType; 4] = [
        JobType::Browser,
        JobType::Rules,
        JobType::Alert,
        JobType::SecretRefresh,
    ];
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Per-site alerting toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "alert_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertMode {
    Active,
    Muted,
}

/// Which detection produced an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "rule_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    UnknownDomain,
    IocDomain,
    YaraRule,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "alert_severity", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

/// Delivery state of an alert. `pending` transitions to exactly one of
/// `muted`, `dispatched`, or `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "delivery_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Muted,
    Dispatched,
    Failed,
}

/// What the scheduler does when a task fires while a previous firing is
/// still in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "overrun_policy", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OverrunPolicy {
    Skip,
    Queue,
    Reschedule,
}

/// Allow-list pattern matching strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "allowlist_pattern_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Exact,
    Wildcard,
    Glob,
    EtldPlusOne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ioc_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IocType {
    Fqdn,
    Ip,
}

/// HTTP method configured on an alert sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "sink_method", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SinkMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl SinkMethod {
    pub fn as_reqwest(&self) -> reqwest::Method {
        match self {
            SinkMethod::Get => reqwest::Method::GET,
            SinkMethod::Post => reqwest::Method::POST,
            SinkMethod::Put => reqwest::Method::PUT,
            SinkMethod::Patch => reqwest::Method::PATCH,
            SinkMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Outcome of the most recent secret refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "refresh_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    Success,
    Failed,
    Pending,
}

bitflags! {
    /// Which in-flight job states count as an overrun for a scheduled task.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OverrunStateMask: i32 {
        /// A pending job for the task exists.
        const PENDING = 1;
        /// A running job with an unexpired lease exists.
        const RUNNING = 1 << 1;
        /// A running job whose lease has expired exists.
        const OVERDUE = 1 << 2;
    }
}

impl Default for OverrunStateMask {
    fn default() -> Self {
        OverrunStateMask::PENDING | OverrunStateMask::RUNNING
    }
}

/// A script executed by the (external) browser instrumentation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub body: String,
    pub is_test: bool,
    pub created_at: DateTime<Utc>,
}

/// A monitored website.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Site {
    pub id: Uuid,
    pub name: String,
    pub source_id: Uuid,
    pub run_every_minutes: i32,
    pub enabled: bool,
    pub alert_mode: AlertMode,
    pub scope: String,
    pub http_alert_sink_id: Option<Uuid>,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An opaque named value referenced by sources and sinks via `__NAME__`
/// placeholders.
///
/// Invariant (enforced by a table CHECK): when `refresh_enabled` is set,
/// `provider_script_path` and `refresh_interval_secs` are both present.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Secret {
    pub id: Uuid,
    pub name: String,
    pub value: String,
    pub provider_script_path: Option<String>,
    pub refresh_interval_secs: Option<i64>,
    pub refresh_enabled: bool,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub last_refresh_status: Option<RefreshStatus>,
    pub last_refresh_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Operator-configured webhook destination for alerts.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HttpAlertSink {
    pub id: Uuid,
    pub name: String,
    pub uri: String,
    pub method: SinkMethod,
    pub body: Option<String>,
    pub query_params: Option<String>,
    /// JSON object mapping header name to value template.
    pub headers: Option<Value>,
    pub ok_status: i32,
    pub retry: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A durable queued unit of work.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub payload: Value,
    /// May carry `scheduler.task_name` and `scheduler.fire_key`.
    pub metadata: Value,
    pub site_id: Option<Uuid>,
    pub source_id: Option<Uuid>,
    pub is_test: bool,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Scheduler fire-key, when this job was scheduler-originated.
    pub fn fire_key(&self) -> Option<&str> {
        self.metadata.get("scheduler.fire_key").and_then(Value::as_str)
    }

    pub fn task_name(&self) -> Option<&str> {
        self.metadata.get("scheduler.task_name").and_then(Value::as_str)
    }
}

/// A registered periodic task the scheduler fires.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub task_name: String,
    pub payload: Value,
    pub interval_secs: i64,
    pub last_queued_at: Option<DateTime<Utc>>,
    pub overrun_policy: OverrunPolicy,
    pub overrun_state_mask: i32,
    pub active_fire_key: Option<String>,
    pub active_fire_key_set_at: Option<DateTime<Utc>>,
    pub priority: i32,
    pub max_retries: i32,
    pub default_job_type: JobType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn overrun_mask(&self) -> OverrunStateMask {
        OverrunStateMask::from_bits_truncate(self.overrun_state_mask)
    }
}

/// A browser-recorded observation (network request, script, DOM snapshot).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Event {
    pub id: Uuid,
    pub session_id: Uuid,
    pub source_job_id: Option<Uuid>,
    pub event_type: String,
    pub event_data: Value,
    /// Holds `attribution.url` and `attribution.userAgent`.
    pub metadata: Value,
    pub priority: i32,
    pub should_process: bool,
    pub processed: bool,
    pub storage_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A detection produced by the rule pipeline.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Alert {
    pub id: Uuid,
    pub site_id: Uuid,
    pub rule_type: RuleType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub event_context: Value,
    pub metadata: Value,
    pub delivery_status: DeliveryStatus,
    pub fired_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

/// Persisted outcome of a job run, retained after the job itself is reaped.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobResult {
    pub id: Uuid,
    pub job_id: Option<Uuid>,
    pub job_type: JobType,
    pub result: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// First/last sighting of a domain within a (site, scope).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SeenDomain {
    pub id: Uuid,
    pub site_id: Uuid,
    pub scope: String,
    pub domain: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub hit_count: i64,
}

/// An allow-list row. `scope` may be the pseudo-scope `global`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AllowlistEntry {
    pub id: Uuid,
    pub scope: String,
    pub pattern: String,
    pub pattern_type: PatternType,
    pub enabled: bool,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

impl IocType {
    pub fn label(&self) -> &'static str {
        match self {
            IocType::Fqdn => "domain",
            IocType::Ip => "IP address",
        }
    }
}

/// Known indicator of compromise.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Ioc {
    pub id: Uuid,
    pub ioc_type: IocType,
    pub value: String,
    pub enabled: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

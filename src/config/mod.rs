//! Configuration for the merrymaker core.
//!
//! Loaded from environment variables (prefix `MERRYMAKER_`) through figment.
//! Duration-valued options accept both numeric values (interpreted as
//! seconds) and duration strings with units ("30s", "2m", "1500ms", "7d").
//! Unrecognized options in the namespace are rejected at startup.

use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Main application configuration.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Log level for this application's target specifically.
    ///
    /// Valid values: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Port for the operational status server (default: 8080)
    #[serde(default = "default_port")]
    pub port: u16,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Shared key-value store (redis) connection URL
    pub redis_url: String,
    /// Graceful shutdown timeout
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,

    /// How long a reserved job's lease lasts before it is considered abandoned
    #[serde(
        default = "default_lease_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub lease_duration: Duration,
    /// Worker pool sizes per job type
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Scheduler wake interval
    #[serde(
        default = "default_scheduler_tick",
        deserialize_with = "deserialize_duration"
    )]
    pub scheduler_tick: Duration,
    /// Maximum due tasks claimed per scheduler tick
    #[serde(default = "default_scheduler_batch")]
    pub scheduler_batch: i64,

    /// Reaper configuration
    #[serde(default)]
    pub reaper: ReaperConfig,

    /// Local cache tier element capacity
    #[serde(default = "default_local_cache_capacity")]
    pub local_cache_capacity: usize,
    /// Local cache tier default TTL
    #[serde(
        default = "default_local_cache_ttl",
        deserialize_with = "deserialize_duration"
    )]
    pub local_cache_ttl: Duration,

    /// Per-attempt timeout for outbound alert webhook calls
    #[serde(
        default = "default_dispatch_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub dispatch_timeout: Duration,
    /// User-Agent header on outbound webhook calls
    #[serde(default = "default_http_user_agent")]
    pub http_user_agent: String,
}

/// Worker pool sizes, one pool per job type.
#[derive(Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub browser: usize,
    #[serde(default = "default_worker_count")]
    pub rules: usize,
    #[serde(default = "default_worker_count")]
    pub alert: usize,
    #[serde(default = "default_worker_count")]
    pub secret_refresh: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            browser: default_worker_count(),
            rules: default_worker_count(),
            alert: default_worker_count(),
            secret_refresh: default_worker_count(),
        }
    }
}

/// Reaper intervals, thresholds, and retention windows.
#[derive(Deserialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ReaperConfig {
    /// How often the reaper runs
    #[serde(
        default = "default_reaper_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub interval: Duration,
    /// Pending jobs older than this are failed as stale
    #[serde(
        default = "default_stale_threshold",
        deserialize_with = "deserialize_duration"
    )]
    pub stale_threshold: Duration,
    /// Completed jobs are deleted after this long
    #[serde(
        default = "default_completed_retention",
        deserialize_with = "deserialize_duration"
    )]
    pub completed_retention: Duration,
    /// Failed jobs are deleted after this long
    #[serde(
        default = "default_failed_retention",
        deserialize_with = "deserialize_duration"
    )]
    pub failed_retention: Duration,
    /// Job results are deleted after this long
    #[serde(
        default = "default_result_retention",
        deserialize_with = "deserialize_duration"
    )]
    pub result_retention: Duration,
    /// Maximum rows touched per reap query
    #[serde(default = "default_reaper_batch")]
    pub batch: i64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        ReaperConfig {
            interval: default_reaper_interval(),
            stale_threshold: default_stale_threshold(),
            completed_retention: default_completed_retention(),
            failed_retention: default_failed_retention(),
            result_retention: default_result_retention(),
            batch: default_reaper_batch(),
        }
    }
}

/// Default log level of "info"
fn default_log_level() -> String {
    "info".to_string()
}

/// Default port of 8080
fn default_port() -> u16 {
    8080
}

/// Default shutdown timeout of 8 seconds
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

/// Default job lease of 30 seconds
fn default_lease_duration() -> Duration {
    Duration::from_secs(30)
}

/// Default of 1 worker per job type
fn default_worker_count() -> usize {
    1
}

/// Default scheduler tick of 60 seconds
fn default_scheduler_tick() -> Duration {
    Duration::from_secs(60)
}

/// Default scheduler batch of 25 due tasks per tick
fn default_scheduler_batch() -> i64 {
    25
}

/// Default reaper interval of 1 hour
fn default_reaper_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

/// Default stale threshold of 10 minutes
fn default_stale_threshold() -> Duration {
    Duration::from_secs(10 * 60)
}

/// Default completed-job retention of 7 days
fn default_completed_retention() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

/// Default failed-job retention of 14 days
fn default_failed_retention() -> Duration {
    Duration::from_secs(14 * 24 * 60 * 60)
}

/// Default job-result retention of 30 days
fn default_result_retention() -> Duration {
    Duration::from_secs(30 * 24 * 60 * 60)
}

/// Default reaper batch of 500 rows
fn default_reaper_batch() -> i64 {
    500
}

/// Default local cache capacity of 4096 entries
fn default_local_cache_capacity() -> usize {
    4096
}

/// Default local cache TTL of 60 seconds
fn default_local_cache_ttl() -> Duration {
    Duration::from_secs(60)
}

/// Default webhook attempt timeout of 30 seconds
fn default_dispatch_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Default outbound User-Agent
fn default_http_user_agent() -> String {
    concat!("merrymaker/", env!("CARGO_PKG_VERSION")).to_string()
}

/// Duration parser configured to handle various time units with seconds as default
///
/// Supports milliseconds (ms), seconds (s), minutes (m), hours (h), and
/// days (d). Does not support fractions, exponents, or infinity values.
/// Allows whitespace between the number and the time unit, and multiple
/// units summed together (e.g. "1m 30s" = 90 seconds).
const DURATION_PARSER: DurationParser<'static> = DurationParser::builder()
    .time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
        TimeUnit::Day,
    ])
    .parse_multiple(None)
    .allow_time_unit_delimiter()
    .disable_infinity()
    .disable_fraction()
    .disable_exponent()
    .default_unit(TimeUnit::Second)
    .build();

/// Custom deserializer for duration fields that accepts both numeric and string values
///
/// - Unsigned integers are interpreted as seconds
/// - Signed integers must be non-negative
/// - Strings are parsed with the fundu duration parser
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Visitor;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a duration string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            DURATION_PARSER
                .parse(value)
                .map_err(|e| {
                    serde::de::Error::custom(format!(
                        "Invalid duration format '{}': {}. Examples: '5' (5 seconds), '3500ms', '30s', '2m', '7d'",
                        value, e
                    ))
                })?
                .try_into()
                .map_err(|e| serde::de::Error::custom(format!("Duration conversion error: {}", e)))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            if value < 0 {
                return Err(serde::de::Error::custom("Duration cannot be negative"));
            }
            Ok(Duration::from_secs(value as u64))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

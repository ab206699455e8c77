//! Repositories: per-entity operation structs over a shared [`DbContext`].
//!
//! Unique-name conflicts, foreign-key violations, and CHECK failures are
//! classified into the crate error taxonomy by `crate::error`; nothing in
//! this module inspects SQLSTATE codes directly.

pub mod allowlist;
pub mod alerts;
pub mod browser_events;
pub mod context;
pub mod iocs;
pub mod job_results;
pub mod jobs;
pub mod scheduled_tasks;
pub mod secrets;
pub mod seen_domains;
pub mod sinks;
pub mod sites;
pub mod sources;

pub use context::DbContext;

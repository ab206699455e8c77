//! Domain event types.

use uuid::Uuid;

use crate::data::models::{JobType, RuleType};

/// Unified enum for all domain events.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    Job(JobEvent),
    Alert(AlertEvent),
}

/// Job queue lifecycle events, published by the job repository.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Created { id: Uuid, job_type: JobType },
    Reserved { id: Uuid, job_type: JobType },
    Completed { id: Uuid, job_type: JobType },
    Failed {
        id: Uuid,
        job_type: JobType,
        will_retry: bool,
    },
}

/// Alert lifecycle events, published by the alert service.
#[derive(Debug, Clone)]
pub enum AlertEvent {
    Fired {
        id: Uuid,
        site_id: Uuid,
        rule_type: RuleType,
    },
    Dispatched { id: Uuid },
    DeliveryFailed { id: Uuid },
}

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

/// Health status of a service.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Starting,
    Active,
    Disabled,
    Error,
}

/// A timestamped status entry for a service.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub status: ServiceStatus,
    pub updated_at: Instant,
}

/// Thread-safe registry for services to self-report their health status.
#[derive(Debug, Clone, Default)]
pub struct ServiceStatusRegistry {
    inner: Arc<DashMap<String, StatusEntry>>,
}

impl ServiceStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates the status for a named service.
    pub fn set(&self, name: &str, status: ServiceStatus) {
        self.inner.insert(
            name.to_owned(),
            StatusEntry {
                status,
                updated_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<ServiceStatus> {
        self.inner.get(name).map(|entry| entry.status.clone())
    }

    /// Snapshot of all service statuses.
    pub fn all(&self) -> Vec<(String, ServiceStatus)> {
        let mut statuses: Vec<_> = self
            .inner
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status.clone()))
            .collect();
        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let registry = ServiceStatusRegistry::new();
        registry.set("scheduler", ServiceStatus::Active);
        assert_eq!(registry.get("scheduler"), Some(ServiceStatus::Active));
        assert_eq!(registry.get("missing"), None);
    }

    #[test]
    fn all_returns_sorted_snapshot() {
        let registry = ServiceStatusRegistry::new();
        registry.set("web", ServiceStatus::Active);
        registry.set("reaper", ServiceStatus::Starting);
        let all = registry.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, "reaper");
    }
}

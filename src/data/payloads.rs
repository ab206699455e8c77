//! Typed job payloads.
//!
//! Payloads are stored as JSONB on the job row; these structs define the
//! wire shape and carry the enqueue-time validation rules.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Payload of a `rules` job: which events to evaluate, for which site/scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RulesJobPayload {
    pub event_ids: Vec<Uuid>,
    pub site_id: Uuid,
    pub scope: String,
}

impl RulesJobPayload {
    /// Enqueue-time validation: non-empty event ids and scope.
    pub fn validate(&self) -> Result<()> {
        if self.event_ids.is_empty() {
            return Err(Error::validation_field("event_ids", "must not be empty"));
        }
        if self.scope.trim().is_empty() {
            return Err(Error::validation_field("scope", "must not be empty"));
        }
        Ok(())
    }

    /// Event ids sorted lexicographically, as hashed for the dedupe key.
    pub fn sorted_event_ids(&self) -> Vec<Uuid> {
        let mut ids = self.event_ids.clone();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Payload of an `alert` job: the sink to deliver to and the alert body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertJobPayload {
    pub sink_id: Uuid,
    pub payload: Value,
}

/// Payload of a `secret_refresh` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRefreshPayload {
    pub secret_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_payload_rejects_empty_event_ids() {
        let payload = RulesJobPayload {
            event_ids: vec![],
            site_id: Uuid::new_v4(),
            scope: "default".into(),
        };
        assert!(payload.validate().is_err());
    }

    #[test]
    fn rules_payload_rejects_blank_scope() {
        let payload = RulesJobPayload {
            event_ids: vec![Uuid::new_v4()],
            site_id: Uuid::new_v4(),
            scope: "  ".into(),
        };
        assert!(payload.validate().is_err());
    }

    #[test]
    fn sorted_event_ids_sorts_and_dedupes() {
        let a = Uuid::parse_str("00000000-0000-0000-0000-000000000002").unwrap();
        let b = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let payload = RulesJobPayload {
            event_ids: vec![a, b, a],
            site_id: Uuid::new_v4(),
            scope: "default".into(),
        };
        assert_eq!(payload.sorted_event_ids(), vec![b, a]);
    }
}

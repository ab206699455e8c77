//! Handlers for the job types this binary runs.

pub mod alert_delivery;
pub mod rules_job;
pub mod secret_refresh;

pub use alert_delivery::AlertDeliveryHandler;
pub use rules_job::RulesJobHandler;
pub use secret_refresh::SecretRefreshHandler;

//! Operational HTTP surface: health, service status, and queue stats.
//!
//! This is not the product UI (an external collaborator); it exists so
//! operators and probes can see the core's state without a database
//! session.

pub mod error;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::cache::Cache;
use crate::db::DbContext;
use crate::status::ServiceStatusRegistry;

/// Shared state for the status router.
#[derive(Clone)]
pub struct WebState {
    pub ctx: DbContext,
    pub cache: Arc<dyn Cache>,
    pub statuses: ServiceStatusRegistry,
}

/// Build the operational router.
pub fn create_router(state: WebState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/status", get(routes::status))
        .route("/stats", get(routes::stats))
        .route("/events", get(routes::recent_events))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(10)))
        .with_state(state)
}

//! Route handlers for the operational endpoints.

use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::db::jobs::JobStatRow;
use crate::events::EventSeq;
use crate::web::WebState;
use crate::web::error::ApiError;

#[derive(Serialize)]
pub struct HealthResponse {
    pub database: &'static str,
    pub cache: &'static str,
    pub version: &'static str,
    pub commit: &'static str,
}

/// Liveness plus backing-store checks.
pub async fn health(State(state): State<WebState>) -> Result<Json<HealthResponse>, ApiError> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(state.ctx.pool())
        .await
        .map_err(|e| ApiError::unavailable(format!("database unreachable: {e}")))?;

    let cache = match state.cache.health().await {
        Ok(()) => "ok",
        Err(_) => "degraded",
    };

    Ok(Json(HealthResponse {
        database: "ok",
        cache,
        version: env!("CARGO_PKG_VERSION"),
        commit: env!("GIT_COMMIT_SHORT"),
    }))
}

/// Self-reported status of every registered service.
pub async fn status(State(state): State<WebState>) -> Json<Value> {
    let statuses: Vec<Value> = state
        .statuses
        .all()
        .into_iter()
        .map(|(name, status)| json!({ "service": name, "status": status }))
        .collect();
    Json(json!({ "services": statuses }))
}

/// Queue depth per (job type, status).
pub async fn stats(State(state): State<WebState>) -> Result<Json<Vec<JobStatRow>>, ApiError> {
    let stats = state
        .ctx
        .jobs()
        .stats()
        .await
        .map_err(|e| ApiError::internal_error(e.to_string()))?;
    Ok(Json(stats))
}

#[derive(Deserialize)]
pub struct EventsParams {
    /// Sequence cursor from a previous response; 0 (or absent) starts from
    /// the oldest retained event.
    pub after: Option<EventSeq>,
    pub limit: Option<usize>,
}

/// Domain events from the in-process log.
///
/// Pollers pass the returned `cursor` back as `after` to receive only what
/// they have not yet seen.
pub async fn recent_events(
    State(state): State<WebState>,
    Query(params): Query<EventsParams>,
) -> Json<Value> {
    let limit = params.limit.unwrap_or(50).min(500);
    let (events, cursor) = state
        .ctx
        .events()
        .since(params.after.unwrap_or(0), limit);

    let events: Vec<String> = events
        .into_iter()
        .map(|event| format!("{event:?}"))
        .collect();
    Json(json!({ "events": events, "cursor": cursor }))
}

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use sqlx::PgPool;
use uuid::Uuid;

use merrymaker::cache::{Cache, MemoryCache};
use merrymaker::data::models::{
    AlertMode, Event, JobStatus, JobType, SinkMethod,
};
use merrymaker::db::DbContext;
use merrymaker::db::sinks::NewSink;
use merrymaker::db::sites::NewSite;
use merrymaker::db::sources::NewSource;
use merrymaker::events::EventBuffer;
use merrymaker::queue::JobQueue;

/// Build a `DbContext` over the test pool with a small event buffer.
pub fn make_ctx(pool: &PgPool) -> DbContext {
    DbContext::new(pool.clone(), Arc::new(EventBuffer::new(64)))
}

/// Build a `JobQueue` backed by the in-memory cache.
pub fn make_queue(ctx: &DbContext) -> (JobQueue, Arc<dyn Cache>) {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    (JobQueue::new(ctx.clone(), Arc::clone(&cache)), cache)
}

/// Insert a source with harmless defaults, returning its id.
pub async fn create_source(ctx: &DbContext, name: &str) -> Uuid {
    ctx.sources()
        .create(&NewSource {
            name: name.to_owned(),
            body: "console.log('monitor');".to_owned(),
            is_test: false,
            secret_names: vec![],
        })
        .await
        .expect("create_source failed")
        .id
}

/// Insert a site in the given scope/alert mode, returning its id.
pub async fn create_site(
    ctx: &DbContext,
    name: &str,
    scope: &str,
    alert_mode: AlertMode,
    sink_id: Option<Uuid>,
) -> Uuid {
    let source_id = create_source(ctx, &format!("{name}-source")).await;
    ctx.sites()
        .create(&NewSite {
            name: name.to_owned(),
            source_id,
            run_every_minutes: 15,
            enabled: true,
            alert_mode,
            scope: scope.to_owned(),
            http_alert_sink_id: sink_id,
        })
        .await
        .expect("create_site failed")
        .id
}

/// Insert an HTTP alert sink, returning its id.
#[allow(clippy::too_many_arguments)]
pub async fn create_sink(
    ctx: &DbContext,
    name: &str,
    uri: &str,
    headers: Option<Value>,
    ok_status: i32,
    retry: i32,
    secret_names: Vec<String>,
) -> Uuid {
    ctx.sinks()
        .create(&NewSink {
            name: name.to_owned(),
            uri: uri.to_owned(),
            method: SinkMethod::Post,
            body: None,
            query_params: None,
            headers,
            ok_status,
            retry,
            secret_names,
        })
        .await
        .expect("create_sink failed")
        .id
}

/// Insert a secret with a static value, returning its id.
pub async fn create_secret(ctx: &DbContext, name: &str, value: &str) -> Uuid {
    ctx.secrets()
        .create(&merrymaker::db::secrets::NewSecret {
            name: name.to_owned(),
            value: value.to_owned(),
            provider_script_path: None,
            refresh_interval_secs: None,
            refresh_enabled: false,
        })
        .await
        .expect("create_secret failed")
        .id
}

/// An in-memory network-request event pointed at `request_url`.
pub fn network_event(request_url: &str) -> Event {
    Event {
        id: Uuid::new_v4(),
        session_id: Uuid::new_v4(),
        source_job_id: None,
        event_type: "Network.request".to_owned(),
        event_data: json!({ "request": { "url": request_url } }),
        metadata: json!({}),
        priority: 50,
        should_process: true,
        processed: false,
        storage_key: None,
        created_at: Utc::now(),
    }
}

/// Count job rows of a type in a status.
pub async fn count_jobs(pool: &PgPool, job_type: JobType, status: JobStatus) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE job_type = $1 AND status = $2")
        .bind(job_type)
        .bind(status)
        .fetch_one(pool)
        .await
        .expect("count_jobs failed")
}

/// Read (status, retry_count, last_error) for a job.
pub async fn job_state(pool: &PgPool, job_id: Uuid) -> (JobStatus, i32, Option<String>) {
    sqlx::query_as("SELECT status, retry_count, last_error FROM jobs WHERE id = $1")
        .bind(job_id)
        .fetch_one(pool)
        .await
        .expect("job_state failed")
}

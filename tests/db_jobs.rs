#[allow(dead_code)]
mod helpers;

use std::time::Duration;

use merrymaker::data::models::{JobStatus, JobType, OverrunStateMask};
use merrymaker::db::jobs::{FailOutcome, NewJob};
use serde_json::json;
use sqlx::PgPool;

const LEASE: Duration = Duration::from_secs(30);

// ── reserve_next ────────────────────────────────────────────────────

#[sqlx::test]
async fn reserve_on_empty_queue_reports_no_jobs(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    let err = ctx.jobs().reserve_next(JobType::Alert, LEASE).await.unwrap_err();
    assert!(matches!(err, merrymaker::error::Error::NoJobsAvailable));
}

#[sqlx::test]
async fn reserve_orders_by_priority_then_schedule(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);

    let mut low = NewJob::new(JobType::Alert, json!({"n": "low"}));
    low.priority = 10;
    let mut high = NewJob::new(JobType::Alert, json!({"n": "high"}));
    high.priority = 50;

    // Low inserted first; high must still come out first.
    let low = ctx.jobs().create(&low).await.unwrap();
    let high = ctx.jobs().create(&high).await.unwrap();

    let first = ctx.jobs().reserve_next(JobType::Alert, LEASE).await.unwrap();
    let second = ctx.jobs().reserve_next(JobType::Alert, LEASE).await.unwrap();

    assert_eq!(first.id, high.id);
    assert_eq!(second.id, low.id);
    assert_eq!(first.status, JobStatus::Running);
    assert!(first.started_at.is_some());
    assert!(first.lease_expires_at.is_some());

    // Both complete cleanly.
    assert!(ctx.jobs().complete(first.id).await.unwrap());
    assert!(ctx.jobs().complete(second.id).await.unwrap());
    assert_eq!(
        helpers::count_jobs(&pool, JobType::Alert, JobStatus::Completed).await,
        2
    );
}

#[sqlx::test]
async fn concurrent_reserves_hand_out_distinct_jobs(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);

    let mut high = NewJob::new(JobType::Alert, json!({}));
    high.priority = 50;
    let mut low = NewJob::new(JobType::Alert, json!({}));
    low.priority = 10;
    ctx.jobs().create(&high).await.unwrap();
    ctx.jobs().create(&low).await.unwrap();

    let ctx_a = helpers::make_ctx(&pool);
    let ctx_b = helpers::make_ctx(&pool);
    let jobs_a = ctx_a.jobs();
    let jobs_b = ctx_b.jobs();
    let (first, second) = tokio::join!(
        jobs_a.reserve_next(JobType::Alert, LEASE),
        jobs_b.reserve_next(JobType::Alert, LEASE),
    );
    let first = first.unwrap();
    let second = second.unwrap();

    assert_ne!(first.id, second.id, "workers must not share a job");
    let mut priorities = [first.priority, second.priority];
    priorities.sort();
    assert_eq!(priorities, [10, 50]);
}

#[sqlx::test]
async fn reserve_skips_future_scheduled_jobs(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);

    let mut future = NewJob::new(JobType::Rules, json!({}));
    future.scheduled_at = Some(chrono::Utc::now() + chrono::Duration::hours(1));
    ctx.jobs().create(&future).await.unwrap();

    let err = ctx.jobs().reserve_next(JobType::Rules, LEASE).await.unwrap_err();
    assert!(matches!(err, merrymaker::error::Error::NoJobsAvailable));
}

#[sqlx::test]
async fn reserve_ignores_other_job_types(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    ctx.jobs().create(&NewJob::new(JobType::Browser, json!({}))).await.unwrap();

    let err = ctx.jobs().reserve_next(JobType::Rules, LEASE).await.unwrap_err();
    assert!(matches!(err, merrymaker::error::Error::NoJobsAvailable));
}

#[sqlx::test]
async fn expired_lease_is_reclaimable_by_reserve(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    let job = ctx.jobs().create(&NewJob::new(JobType::Rules, json!({}))).await.unwrap();

    // Reserve with an already-expired lease.
    let reserved = ctx
        .jobs()
        .reserve_next(JobType::Rules, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(reserved.id, job.id);

    let again = ctx.jobs().reserve_next(JobType::Rules, LEASE).await.unwrap();
    assert_eq!(again.id, job.id, "expired-lease job should be reclaimable");
}

// ── heartbeat / complete / fail ─────────────────────────────────────

#[sqlx::test]
async fn heartbeat_extends_only_running_jobs(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    let job = ctx.jobs().create(&NewJob::new(JobType::Rules, json!({}))).await.unwrap();

    assert!(!ctx.jobs().heartbeat(job.id, LEASE).await.unwrap(), "pending job");

    let reserved = ctx.jobs().reserve_next(JobType::Rules, LEASE).await.unwrap();
    assert!(ctx.jobs().heartbeat(reserved.id, LEASE).await.unwrap());

    ctx.jobs().complete(reserved.id).await.unwrap();
    assert!(!ctx.jobs().heartbeat(reserved.id, LEASE).await.unwrap(), "completed job");
}

#[sqlx::test]
async fn complete_is_idempotent(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    ctx.jobs().create(&NewJob::new(JobType::Rules, json!({}))).await.unwrap();
    let job = ctx.jobs().reserve_next(JobType::Rules, LEASE).await.unwrap();

    assert!(ctx.jobs().complete(job.id).await.unwrap());
    assert!(!ctx.jobs().complete(job.id).await.unwrap());
}

#[sqlx::test]
async fn fail_with_details_requeues_until_retries_exhausted(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    let mut new = NewJob::new(JobType::Rules, json!({}));
    new.max_retries = 2;
    let job = ctx.jobs().create(&new).await.unwrap();

    // Attempts 1 and 2 re-queue.
    for expected_retry in 1..=2 {
        let reserved = ctx.jobs().reserve_next(JobType::Rules, LEASE).await.unwrap();
        let outcome = ctx
            .jobs()
            .fail_with_details(reserved.id, "handler exploded")
            .await
            .unwrap();
        assert_eq!(outcome, FailOutcome::Retried);

        let (status, retry_count, last_error) = helpers::job_state(&pool, job.id).await;
        assert_eq!(status, JobStatus::Pending);
        assert_eq!(retry_count, expected_retry);
        assert_eq!(last_error.as_deref(), Some("handler exploded"));
    }

    // Attempt 3 is terminal.
    let reserved = ctx.jobs().reserve_next(JobType::Rules, LEASE).await.unwrap();
    let outcome = ctx
        .jobs()
        .fail_with_details(reserved.id, "handler exploded again")
        .await
        .unwrap();
    assert_eq!(outcome, FailOutcome::Failed);

    let (status, retry_count, last_error) = helpers::job_state(&pool, job.id).await;
    assert_eq!(status, JobStatus::Failed);
    assert_eq!(retry_count, 3);
    assert_eq!(last_error.as_deref(), Some("handler exploded again"));
}

// ── maintenance operations ──────────────────────────────────────────

#[sqlx::test]
async fn delete_by_payload_field_spares_running_jobs(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);

    ctx.jobs()
        .create(&NewJob::new(JobType::Rules, json!({"site_id": "s1"})))
        .await
        .unwrap();
    ctx.jobs()
        .create(&NewJob::new(JobType::Rules, json!({"site_id": "s1"})))
        .await
        .unwrap();
    ctx.jobs()
        .create(&NewJob::new(JobType::Rules, json!({"site_id": "s2"})))
        .await
        .unwrap();

    // Reserve one s1 job; running jobs are not deleted out from under
    // their workers.
    ctx.jobs().reserve_next(JobType::Rules, LEASE).await.unwrap();

    let deleted = ctx.jobs().delete_by_payload_field("site_id", "s1").await.unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(
        helpers::count_jobs(&pool, JobType::Rules, JobStatus::Running).await,
        1
    );
    assert_eq!(
        helpers::count_jobs(&pool, JobType::Rules, JobStatus::Pending).await,
        1
    );
}

#[sqlx::test]
async fn stats_groups_by_type_and_status(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    ctx.jobs().create(&NewJob::new(JobType::Rules, json!({}))).await.unwrap();
    ctx.jobs().create(&NewJob::new(JobType::Rules, json!({}))).await.unwrap();
    ctx.jobs().create(&NewJob::new(JobType::Alert, json!({}))).await.unwrap();

    let stats = ctx.jobs().stats().await.unwrap();
    let rules_pending = stats
        .iter()
        .find(|row| row.job_type == JobType::Rules && row.status == JobStatus::Pending)
        .expect("rules/pending row");
    assert_eq!(rules_pending.count, 2);
}

// ── fire-key uniqueness ─────────────────────────────────────────────

#[sqlx::test]
async fn duplicate_fire_key_conflicts(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);

    let mut first = NewJob::new(JobType::Browser, json!({}));
    first.metadata = json!({
        "scheduler.task_name": "sweep",
        "scheduler.fire_key": "sweep:2026-01-01T00:00:00Z",
    });
    ctx.jobs().create(&first).await.unwrap();

    let mut duplicate = NewJob::new(JobType::Browser, json!({}));
    duplicate.metadata = first.metadata.clone();
    let err = ctx.jobs().create(&duplicate).await.unwrap_err();
    assert!(err.is_conflict_on("scheduler.fire_key"), "got: {err:?}");
}

#[sqlx::test]
async fn states_by_task_name_reports_mask(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);

    let mut pending = NewJob::new(JobType::Browser, json!({}));
    pending.metadata = json!({
        "scheduler.task_name": "sweep",
        "scheduler.fire_key": "sweep:a",
    });
    ctx.jobs().create(&pending).await.unwrap();

    let states = ctx.jobs().states_by_task_name("sweep").await.unwrap();
    assert_eq!(states, OverrunStateMask::PENDING);

    // Reserve it; now running with a live lease.
    ctx.jobs().reserve_next(JobType::Browser, LEASE).await.unwrap();
    let states = ctx.jobs().states_by_task_name("sweep").await.unwrap();
    assert_eq!(states, OverrunStateMask::RUNNING);

    assert_eq!(
        ctx.jobs().states_by_task_name("other-task").await.unwrap(),
        OverrunStateMask::empty()
    );
}

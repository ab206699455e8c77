#[allow(dead_code)]
mod helpers;

use std::time::Duration;

use merrymaker::data::models::{JobStatus, JobType, OverrunPolicy, OverrunStateMask};
use merrymaker::db::scheduled_tasks::TaskRegistration;
use merrymaker::scheduler::Scheduler;
use serde_json::json;
use sqlx::PgPool;

const LEASE: Duration = Duration::from_secs(30);

fn registration(task_name: &str, policy: OverrunPolicy) -> TaskRegistration {
    TaskRegistration {
        task_name: task_name.to_owned(),
        payload: json!({ "sweep": true }),
        interval_secs: 60,
        overrun_policy: policy,
        overrun_state_mask: (OverrunStateMask::PENDING | OverrunStateMask::RUNNING).bits(),
        priority: 40,
        max_retries: 2,
        default_job_type: JobType::Browser,
    }
}

fn make_scheduler(ctx: &merrymaker::db::DbContext) -> Scheduler {
    let (queue, _) = helpers::make_queue(ctx);
    Scheduler::new(ctx.clone(), queue, Duration::from_secs(60), 25)
}

/// Rewind a task's cadence so it is due again.
async fn make_due(pool: &PgPool, task_name: &str) {
    sqlx::query(
        "UPDATE scheduled_tasks SET last_queued_at = NOW() - INTERVAL '10 minutes'
         WHERE task_name = $1",
    )
    .bind(task_name)
    .execute(pool)
    .await
    .unwrap();
}

// ── firing ──────────────────────────────────────────────────────────

#[sqlx::test]
async fn due_task_fires_a_job_with_scheduler_metadata(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    ctx.scheduled_tasks()
        .upsert_by_task_name(&registration("site-sweep", OverrunPolicy::Skip))
        .await
        .unwrap();

    make_scheduler(&ctx).tick().await.unwrap();

    let jobs = ctx
        .jobs()
        .list(Some(JobType::Browser), Some(JobStatus::Pending), 10, 0)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.task_name(), Some("site-sweep"));
    assert!(job.fire_key().unwrap().starts_with("site-sweep:"));
    assert_eq!(job.priority, 40);
    assert_eq!(job.max_retries, 2);
    assert_eq!(job.payload, json!({ "sweep": true }));

    let task = ctx
        .scheduled_tasks()
        .get_by_task_name("site-sweep")
        .await
        .unwrap();
    assert!(task.last_queued_at.is_some());
    assert_eq!(task.active_fire_key.as_deref(), job.fire_key());
}

#[sqlx::test]
async fn task_does_not_fire_again_before_interval(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    ctx.scheduled_tasks()
        .upsert_by_task_name(&registration("site-sweep", OverrunPolicy::Queue))
        .await
        .unwrap();

    let scheduler = make_scheduler(&ctx);
    scheduler.tick().await.unwrap();
    scheduler.tick().await.unwrap();

    assert_eq!(
        helpers::count_jobs(&pool, JobType::Browser, JobStatus::Pending).await,
        1,
        "second tick within the interval must not fire"
    );
}

// ── overrun policies ────────────────────────────────────────────────

#[sqlx::test]
async fn skip_policy_holds_while_previous_job_is_in_flight(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    ctx.scheduled_tasks()
        .upsert_by_task_name(&registration("site-sweep", OverrunPolicy::Skip))
        .await
        .unwrap();

    let scheduler = make_scheduler(&ctx);
    scheduler.tick().await.unwrap();

    // Force dueness while the first job is still pending.
    make_due(&pool, "site-sweep").await;
    scheduler.tick().await.unwrap();

    assert_eq!(
        helpers::count_jobs(&pool, JobType::Browser, JobStatus::Pending).await,
        1,
        "skip policy must not stack jobs"
    );

    // Cadence advanced as if the task had been queued.
    let task = ctx
        .scheduled_tasks()
        .get_by_task_name("site-sweep")
        .await
        .unwrap();
    let age = chrono::Utc::now() - task.last_queued_at.unwrap();
    assert!(age < chrono::Duration::seconds(30), "last_queued_at should be fresh");
}

#[sqlx::test]
async fn queue_policy_allows_stacked_jobs(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    ctx.scheduled_tasks()
        .upsert_by_task_name(&registration("site-sweep", OverrunPolicy::Queue))
        .await
        .unwrap();

    let scheduler = make_scheduler(&ctx);
    scheduler.tick().await.unwrap();
    make_due(&pool, "site-sweep").await;
    scheduler.tick().await.unwrap();

    assert_eq!(
        helpers::count_jobs(&pool, JobType::Browser, JobStatus::Pending).await,
        2
    );
}

#[sqlx::test]
async fn reschedule_policy_backs_off_while_fire_key_is_active(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    ctx.scheduled_tasks()
        .upsert_by_task_name(&registration("site-sweep", OverrunPolicy::Reschedule))
        .await
        .unwrap();

    let scheduler = make_scheduler(&ctx);
    scheduler.tick().await.unwrap();

    make_due(&pool, "site-sweep").await;
    scheduler.tick().await.unwrap();

    // The first job is still in flight, so no second job; cadence moved to
    // half an interval ago so the next tick retries sooner.
    assert_eq!(
        helpers::count_jobs(&pool, JobType::Browser, JobStatus::Pending).await,
        1
    );
    let task = ctx
        .scheduled_tasks()
        .get_by_task_name("site-sweep")
        .await
        .unwrap();
    let age = chrono::Utc::now() - task.last_queued_at.unwrap();
    assert!(age >= chrono::Duration::seconds(29), "cadence should be backdated");
    assert!(age < chrono::Duration::seconds(60));
}

#[sqlx::test]
async fn reschedule_policy_fires_once_previous_job_finishes(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    ctx.scheduled_tasks()
        .upsert_by_task_name(&registration("site-sweep", OverrunPolicy::Reschedule))
        .await
        .unwrap();

    let scheduler = make_scheduler(&ctx);
    scheduler.tick().await.unwrap();

    // Finish the first job the way the runner would.
    let job = ctx.jobs().reserve_next(JobType::Browser, LEASE).await.unwrap();
    ctx.jobs().complete(job.id).await.unwrap();
    ctx.scheduled_tasks()
        .release_fire_key(job.task_name().unwrap(), job.fire_key().unwrap())
        .await
        .unwrap();

    make_due(&pool, "site-sweep").await;
    scheduler.tick().await.unwrap();

    assert_eq!(
        helpers::count_jobs(&pool, JobType::Browser, JobStatus::Pending).await,
        1,
        "a fresh job should fire after the previous one completed"
    );
}

// ── registration ────────────────────────────────────────────────────

#[sqlx::test]
async fn upsert_preserves_last_queued_at(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    ctx.scheduled_tasks()
        .upsert_by_task_name(&registration("site-sweep", OverrunPolicy::Skip))
        .await
        .unwrap();

    make_scheduler(&ctx).tick().await.unwrap();
    let before = ctx
        .scheduled_tasks()
        .get_by_task_name("site-sweep")
        .await
        .unwrap();
    assert!(before.last_queued_at.is_some());

    // Re-register with a different interval; cadence must survive.
    let mut updated = registration("site-sweep", OverrunPolicy::Queue);
    updated.interval_secs = 300;
    ctx.scheduled_tasks().upsert_by_task_name(&updated).await.unwrap();

    let after = ctx
        .scheduled_tasks()
        .get_by_task_name("site-sweep")
        .await
        .unwrap();
    assert_eq!(after.last_queued_at, before.last_queued_at);
    assert_eq!(after.interval_secs, 300);
    assert_eq!(after.overrun_policy, OverrunPolicy::Queue);
}

#[sqlx::test]
async fn delete_by_task_name_removes_registration(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    ctx.scheduled_tasks()
        .upsert_by_task_name(&registration("site-sweep", OverrunPolicy::Skip))
        .await
        .unwrap();

    assert!(ctx.scheduled_tasks().delete_by_task_name("site-sweep").await.unwrap());
    assert!(
        ctx.scheduled_tasks()
            .get_by_task_name("site-sweep")
            .await
            .unwrap_err()
            .is_not_found()
    );
}

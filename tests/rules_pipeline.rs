#[allow(dead_code)]
mod helpers;

use std::sync::Arc;

use merrymaker::alerts::AlertService;
use merrymaker::cache::Cache;
use merrymaker::data::models::{
    AlertMode, DeliveryStatus, IocType, JobStatus, JobType, PatternType,
};
use merrymaker::db::DbContext;
use merrymaker::db::allowlist::NewAllowlistEntry;
use merrymaker::db::iocs::NewIoc;
use merrymaker::queue::JobQueue;
use merrymaker::rules::ioc::IocRule;
use merrymaker::rules::unknown_domain::UnknownDomainRule;
use merrymaker::rules::{RulePipeline, UrlDomainExtractor};
use sqlx::PgPool;
use uuid::Uuid;

struct Rig {
    ctx: DbContext,
    #[allow(dead_code)]
    queue: JobQueue,
    cache: Arc<dyn Cache>,
    pipeline: RulePipeline,
}

fn make_rig(pool: &PgPool) -> Rig {
    let ctx = helpers::make_ctx(pool);
    let (queue, cache) = helpers::make_queue(&ctx);
    let alerts: Arc<dyn merrymaker::rules::AlertResolver> =
        Arc::new(AlertService::new(ctx.clone(), queue.clone()));

    let mut pipeline = RulePipeline::new(Arc::new(UrlDomainExtractor));
    pipeline.register(Arc::new(UnknownDomainRule::new(
        ctx.clone(),
        Arc::clone(&cache),
        Arc::clone(&alerts),
    )));
    pipeline.register(Arc::new(IocRule::new(ctx.clone(), Arc::clone(&alerts))));

    Rig {
        ctx,
        queue,
        cache,
        pipeline,
    }
}

async fn alert_count(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM alerts")
        .fetch_one(pool)
        .await
        .unwrap()
}

// ── unknown-domain scenarios ────────────────────────────────────────

#[sqlx::test]
async fn dry_run_reports_would_alert_without_creating_rows(pool: PgPool) {
    let rig = make_rig(&pool);
    let site_id =
        helpers::create_site(&rig.ctx, "shop", "default", AlertMode::Active, None).await;

    let events = vec![helpers::network_event("https://new.example.test/x")];
    let results = rig
        .pipeline
        .run(&events, site_id, "default", true, AlertMode::Active, Uuid::new_v4())
        .await;

    assert_eq!(results.alerts_created.count, 0);
    assert_eq!(results.unknown_domains.count, 1);
    assert_eq!(results.unknown_domain.alerted_dry_run.count, 1);
    assert_eq!(results.would_alert_unknown, vec!["new.example.test".to_string()]);
    assert_eq!(alert_count(&pool).await, 0, "dry run must not create alerts");
}

#[sqlx::test]
async fn live_unknown_domain_creates_pending_alert(pool: PgPool) {
    let rig = make_rig(&pool);
    let site_id =
        helpers::create_site(&rig.ctx, "shop", "default", AlertMode::Active, None).await;

    let events = vec![helpers::network_event("https://new.example.test/x")];
    let results = rig
        .pipeline
        .run(&events, site_id, "default", false, AlertMode::Active, Uuid::new_v4())
        .await;

    assert_eq!(results.alerts_created.count, 1);
    assert_eq!(results.unknown_domain.alerted.count, 1);

    let alerts = rig.ctx.alerts().list_for_site(site_id, 10, 0).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].delivery_status, DeliveryStatus::Pending);
}

#[sqlx::test]
async fn muted_site_gets_muted_alert_and_no_delivery_job(pool: PgPool) {
    let rig = make_rig(&pool);
    let site_id =
        helpers::create_site(&rig.ctx, "quiet-shop", "default", AlertMode::Muted, None).await;

    let events = vec![helpers::network_event("https://new.example.test/x")];
    let results = rig
        .pipeline
        .run(&events, site_id, "default", false, AlertMode::Muted, Uuid::new_v4())
        .await;

    assert_eq!(results.unknown_domain.alerted_muted.count, 1);
    assert_eq!(results.alerts_created.count, 0, "muted alerts are not counted as created");

    let alerts = rig.ctx.alerts().list_for_site(site_id, 10, 0).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].delivery_status, DeliveryStatus::Muted);

    assert_eq!(
        helpers::count_jobs(&pool, JobType::Alert, JobStatus::Pending).await,
        0,
        "no delivery job for muted alerts"
    );
}

#[sqlx::test]
async fn allowlisted_domain_is_suppressed(pool: PgPool) {
    let rig = make_rig(&pool);
    let site_id =
        helpers::create_site(&rig.ctx, "shop", "default", AlertMode::Active, None).await;

    rig.ctx
        .allowlist()
        .create(&NewAllowlistEntry {
            scope: "default".into(),
            pattern: "*.example.test".into(),
            pattern_type: PatternType::Wildcard,
            enabled: true,
            priority: 100,
        })
        .await
        .unwrap();

    let events = vec![helpers::network_event("https://cdn.example.test/a.js")];
    let results = rig
        .pipeline
        .run(&events, site_id, "default", false, AlertMode::Active, Uuid::new_v4())
        .await;

    assert_eq!(results.unknown_domain.suppressed_allowlist.count, 1);
    assert_eq!(results.unknown_domains.count, 0);
    assert_eq!(alert_count(&pool).await, 0);
}

#[sqlx::test]
async fn global_scope_allowlist_applies_everywhere(pool: PgPool) {
    let rig = make_rig(&pool);
    let site_id =
        helpers::create_site(&rig.ctx, "shop", "tenant-a", AlertMode::Active, None).await;

    rig.ctx
        .allowlist()
        .create(&NewAllowlistEntry {
            scope: "global".into(),
            pattern: "telemetry.example.test".into(),
            pattern_type: PatternType::Exact,
            enabled: true,
            priority: 1,
        })
        .await
        .unwrap();

    let events = vec![helpers::network_event("https://telemetry.example.test/beat")];
    let results = rig
        .pipeline
        .run(&events, site_id, "tenant-a", false, AlertMode::Active, Uuid::new_v4())
        .await;

    assert_eq!(results.unknown_domain.suppressed_allowlist.count, 1);
}

#[sqlx::test]
async fn second_sighting_is_suppressed_as_seen(pool: PgPool) {
    let rig = make_rig(&pool);
    let site_id =
        helpers::create_site(&rig.ctx, "shop", "default", AlertMode::Active, None).await;

    // First sighting records the domain (and alerts).
    let events = vec![helpers::network_event("https://new.example.test/x")];
    rig.pipeline
        .run(&events, site_id, "default", false, AlertMode::Active, Uuid::new_v4())
        .await;

    // Second sighting is seen. The rig's cache would short-circuit first;
    // go through a fresh rig to exercise the database path too.
    let fresh = make_rig(&pool);
    let events = vec![helpers::network_event("https://new.example.test/y")];
    let results = fresh
        .pipeline
        .run(&events, site_id, "default", false, AlertMode::Active, Uuid::new_v4())
        .await;

    assert_eq!(results.unknown_domain.suppressed_seen.count, 1);
    assert_eq!(alert_count(&pool).await, 1, "no second alert");
}

#[sqlx::test]
async fn alert_once_token_survives_muted_alerts(pool: PgPool) {
    let rig = make_rig(&pool);
    let site_id =
        helpers::create_site(&rig.ctx, "quiet-shop", "default", AlertMode::Muted, None).await;

    // Muted alert consumes the alert-once token.
    let events = vec![helpers::network_event("https://new.example.test/x")];
    rig.pipeline
        .run(&events, site_id, "default", false, AlertMode::Muted, Uuid::new_v4())
        .await;
    assert_eq!(alert_count(&pool).await, 1);

    // Un-mute and clear the seen state (row and hint) to isolate the
    // dedupe token; the same cache still holds the token, so nothing
    // re-fires.
    sqlx::query("DELETE FROM seen_domains").execute(&pool).await.unwrap();
    rig.cache
        .delete(&merrymaker::cache::keys::seen_domain(
            site_id,
            "default",
            "new.example.test",
        ))
        .await
        .unwrap();
    let events = vec![helpers::network_event("https://new.example.test/x")];
    let results = rig
        .pipeline
        .run(&events, site_id, "default", false, AlertMode::Active, Uuid::new_v4())
        .await;

    assert_eq!(results.unknown_domain.suppressed_dedupe.count, 1);
    assert_eq!(alert_count(&pool).await, 1, "token blocks the re-fire");
}

#[sqlx::test]
async fn events_without_a_domain_are_skipped(pool: PgPool) {
    let rig = make_rig(&pool);
    let site_id =
        helpers::create_site(&rig.ctx, "shop", "default", AlertMode::Active, None).await;

    let mut event = helpers::network_event("https://ok.example.test/x");
    event.event_data = serde_json::json!({ "note": "no url anywhere" });

    let results = rig
        .pipeline
        .run(&[event], site_id, "default", false, AlertMode::Active, Uuid::new_v4())
        .await;

    assert_eq!(results.events_skipped.count, 1);
    assert_eq!(results.domains_processed.count, 0);
}

// ── IOC scenarios ───────────────────────────────────────────────────

#[sqlx::test]
async fn ioc_match_creates_high_severity_alert(pool: PgPool) {
    let rig = make_rig(&pool);
    let site_id =
        helpers::create_site(&rig.ctx, "shop", "default", AlertMode::Active, None).await;

    rig.ctx
        .iocs()
        .create(&NewIoc {
            ioc_type: IocType::Fqdn,
            value: "Exfil.Evil.Test".into(),
            enabled: true,
            description: None,
        })
        .await
        .unwrap();

    let events = vec![helpers::network_event("https://exfil.evil.test/collect")];
    let results = rig
        .pipeline
        .run(&events, site_id, "default", false, AlertMode::Active, Uuid::new_v4())
        .await;

    assert_eq!(results.ioc_host_matches.count, 1);
    assert_eq!(results.ioc.alerts.count, 1);

    let alerts = rig.ctx.alerts().list_for_site(site_id, 10, 0).await.unwrap();
    assert!(
        alerts
            .iter()
            .any(|a| a.rule_type == merrymaker::data::models::RuleType::IocDomain)
    );
}

#[sqlx::test]
async fn ioc_dry_run_reports_would_alert(pool: PgPool) {
    let rig = make_rig(&pool);
    let site_id =
        helpers::create_site(&rig.ctx, "shop", "default", AlertMode::Active, None).await;

    rig.ctx
        .iocs()
        .create(&NewIoc {
            ioc_type: IocType::Fqdn,
            value: "exfil.evil.test".into(),
            enabled: true,
            description: None,
        })
        .await
        .unwrap();

    let events = vec![helpers::network_event("https://exfil.evil.test/collect")];
    let results = rig
        .pipeline
        .run(&events, site_id, "default", true, AlertMode::Active, Uuid::new_v4())
        .await;

    assert_eq!(results.ioc.matches_dry_run.count, 1);
    assert_eq!(results.would_alert_ioc, vec!["exfil.evil.test".to_string()]);
    assert_eq!(alert_count(&pool).await, 0);
}

#[sqlx::test]
async fn disabled_ioc_does_not_match(pool: PgPool) {
    let rig = make_rig(&pool);
    let site_id =
        helpers::create_site(&rig.ctx, "shop", "default", AlertMode::Active, None).await;

    rig.ctx
        .iocs()
        .create(&NewIoc {
            ioc_type: IocType::Fqdn,
            value: "disabled.evil.test".into(),
            enabled: false,
            description: None,
        })
        .await
        .unwrap();

    let events = vec![helpers::network_event("https://disabled.evil.test/x")];
    let results = rig
        .pipeline
        .run(&events, site_id, "default", true, AlertMode::Active, Uuid::new_v4())
        .await;

    assert_eq!(results.ioc_host_matches.count, 0);
}

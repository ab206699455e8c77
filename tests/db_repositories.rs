#[allow(dead_code)]
mod helpers;

use merrymaker::data::models::{AlertMode, IocType, PatternType, RefreshStatus};
use merrymaker::db::allowlist::NewAllowlistEntry;
use merrymaker::db::iocs::NewIoc;
use merrymaker::db::secrets::NewSecret;
use merrymaker::db::sources::NewSource;
use sqlx::PgPool;

// ── error classification ────────────────────────────────────────────

#[sqlx::test]
async fn duplicate_site_name_surfaces_as_conflict_on_name(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    helpers::create_site(&ctx, "shop", "default", AlertMode::Active, None).await;

    let source_id = helpers::create_source(&ctx, "other-source").await;
    let err = ctx
        .sites()
        .create(&merrymaker::db::sites::NewSite {
            name: "shop".into(),
            source_id,
            run_every_minutes: 15,
            enabled: true,
            alert_mode: AlertMode::Active,
            scope: "default".into(),
            http_alert_sink_id: None,
        })
        .await
        .unwrap_err();

    assert!(err.is_conflict_on("name"), "got: {err:?}");
}

#[sqlx::test]
async fn short_source_body_surfaces_as_validation(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    let err = ctx
        .sources()
        .create(&NewSource {
            name: "tiny".into(),
            body: "x".into(),
            is_test: false,
            secret_names: vec![],
        })
        .await
        .unwrap_err();
    assert!(err.is_validation(), "got: {err:?}");
}

#[sqlx::test]
async fn missing_rows_surface_as_not_found(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    let err = ctx.sites().get_by_id(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[sqlx::test]
async fn referenced_secret_cannot_be_deleted(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    let secret_id = helpers::create_secret(&ctx, "TKN", "abc").await;
    helpers::create_sink(
        &ctx,
        "hook",
        "http://sink.test/hook",
        None,
        200,
        3,
        vec!["TKN".into()],
    )
    .await;

    let err = ctx.secrets().delete(secret_id).await.unwrap_err();
    assert!(err.is_foreign_key(), "got: {err:?}");
}

// ── secrets ─────────────────────────────────────────────────────────

#[sqlx::test]
async fn refresh_enabled_requires_provider_and_interval(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    let err = ctx
        .secrets()
        .create(&NewSecret {
            name: "broken".into(),
            value: "v".into(),
            provider_script_path: None,
            refresh_interval_secs: None,
            refresh_enabled: true,
        })
        .await
        .unwrap_err();
    assert!(err.is_validation(), "got: {err:?}");
}

#[sqlx::test]
async fn refresh_lifecycle_claims_then_records_outcome(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    let secret = ctx
        .secrets()
        .create(&NewSecret {
            name: "rotating".into(),
            value: "old".into(),
            provider_script_path: Some("/opt/providers/rotate.sh".into()),
            refresh_interval_secs: Some(60),
            refresh_enabled: true,
        })
        .await
        .unwrap();

    // Never refreshed, so due immediately; claiming marks it pending.
    let due = ctx.secrets().claim_due_for_refresh(10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(
        ctx.secrets().get_by_id(secret.id).await.unwrap().last_refresh_status,
        Some(RefreshStatus::Pending)
    );

    // A second sweep must not double-claim.
    assert!(ctx.secrets().claim_due_for_refresh(10).await.unwrap().is_empty());

    ctx.secrets().record_refresh_success(secret.id, "new").await.unwrap();
    let refreshed = ctx.secrets().get_by_id(secret.id).await.unwrap();
    assert_eq!(refreshed.value, "new");
    assert_eq!(refreshed.last_refresh_status, Some(RefreshStatus::Success));
    assert!(refreshed.last_refreshed_at.is_some());
    assert_eq!(refreshed.last_refresh_error, None);
}

#[sqlx::test]
async fn failed_refresh_keeps_previous_value(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    let secret = ctx
        .secrets()
        .create(&NewSecret {
            name: "rotating".into(),
            value: "old".into(),
            provider_script_path: Some("/opt/providers/rotate.sh".into()),
            refresh_interval_secs: Some(60),
            refresh_enabled: true,
        })
        .await
        .unwrap();

    ctx.secrets()
        .record_refresh_failure(secret.id, "provider exited 1")
        .await
        .unwrap();

    let after = ctx.secrets().get_by_id(secret.id).await.unwrap();
    assert_eq!(after.value, "old");
    assert_eq!(after.last_refresh_status, Some(RefreshStatus::Failed));
    assert_eq!(after.last_refresh_error.as_deref(), Some("provider exited 1"));
}

// ── sources ─────────────────────────────────────────────────────────

#[sqlx::test]
async fn resolved_body_substitutes_secrets_and_caches(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    let cache = merrymaker::cache::MemoryCache::new();

    helpers::create_secret(&ctx, "API_KEY", "k-123").await;
    let source = ctx
        .sources()
        .create(&merrymaker::db::sources::NewSource {
            name: "checkout-probe".into(),
            body: "fetch('/api', {headers: {auth: '__API_KEY__'}});".into(),
            is_test: false,
            secret_names: vec!["API_KEY".into()],
        })
        .await
        .unwrap();

    let resolved = ctx.sources().resolved_body(&cache, source.id).await.unwrap();
    assert!(resolved.contains("k-123"));
    assert!(!resolved.contains("__API_KEY__"));

    // Second read is served from cache even if the row changes underneath.
    ctx.sources()
        .update_body(source.id, "fetch('/changed');")
        .await
        .unwrap();
    let cached = ctx.sources().resolved_body(&cache, source.id).await.unwrap();
    assert_eq!(cached, resolved);
}

// ── seen domains ────────────────────────────────────────────────────

#[sqlx::test]
async fn record_seen_upserts_and_counts_hits(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    let site_id = helpers::create_site(&ctx, "shop", "default", AlertMode::Active, None).await;

    let first = ctx
        .seen_domains()
        .record_seen(site_id, "default", "cdn.example.test")
        .await
        .unwrap();
    assert_eq!(first.hit_count, 1);

    let second = ctx
        .seen_domains()
        .record_seen(site_id, "default", "cdn.example.test")
        .await
        .unwrap();
    assert_eq!(second.hit_count, 2);
    assert!(second.last_seen_at >= first.last_seen_at);
    assert_eq!(second.first_seen_at, first.first_seen_at);

    // Scopes partition the state.
    let other_scope = ctx
        .seen_domains()
        .record_seen(site_id, "staging", "cdn.example.test")
        .await
        .unwrap();
    assert_eq!(other_scope.hit_count, 1);

    let looked_up = ctx
        .seen_domains()
        .lookup(site_id, "cdn.example.test", "default")
        .await
        .unwrap()
        .expect("row should exist");
    assert_eq!(looked_up.hit_count, 2);
}

// ── allow-list ──────────────────────────────────────────────────────

#[sqlx::test]
async fn get_for_scope_merges_global_and_orders_by_priority(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);

    for (scope, pattern, priority) in [
        ("default", "cdn.example.test", 200),
        ("global", "cdn.example.test", 100),
        ("staging", "cdn.example.test", 50),
    ] {
        ctx.allowlist()
            .create(&NewAllowlistEntry {
                scope: scope.into(),
                pattern: pattern.into(),
                pattern_type: PatternType::Exact,
                enabled: true,
                priority,
            })
            .await
            .unwrap();
    }

    let entries = ctx
        .allowlist()
        .get_for_scope("cdn.example.test", "default")
        .await
        .unwrap();
    assert_eq!(entries.len(), 2, "staging entry must not leak into default");
    assert_eq!(entries[0].scope, "global");
    assert_eq!(entries[0].priority, 100);
    assert_eq!(entries[1].scope, "default");
}

#[sqlx::test]
async fn disabled_allowlist_entries_are_ignored(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    ctx.allowlist()
        .create(&NewAllowlistEntry {
            scope: "default".into(),
            pattern: "cdn.example.test".into(),
            pattern_type: PatternType::Exact,
            enabled: false,
            priority: 10,
        })
        .await
        .unwrap();

    let entries = ctx
        .allowlist()
        .get_for_scope("cdn.example.test", "default")
        .await
        .unwrap();
    assert!(entries.is_empty());
}

// ── iocs ────────────────────────────────────────────────────────────

#[sqlx::test]
async fn fqdn_iocs_are_unique_case_insensitively(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    ctx.iocs()
        .create(&NewIoc {
            ioc_type: IocType::Fqdn,
            value: "Evil.Test".into(),
            enabled: true,
            description: None,
        })
        .await
        .unwrap();

    let err = ctx
        .iocs()
        .create(&NewIoc {
            ioc_type: IocType::Fqdn,
            value: "evil.test".into(),
            enabled: true,
            description: None,
        })
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "got: {err:?}");

    let hit = ctx.iocs().lookup_host("EVIL.TEST").await.unwrap();
    assert!(hit.is_some(), "fqdn lookup is case-insensitive");
}

#[sqlx::test]
async fn ip_iocs_match_exactly(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);
    ctx.iocs()
        .create(&NewIoc {
            ioc_type: IocType::Ip,
            value: "203.0.113.7".into(),
            enabled: true,
            description: Some("known exfil host".into()),
        })
        .await
        .unwrap();

    assert!(ctx.iocs().lookup_host("203.0.113.7").await.unwrap().is_some());
    assert!(ctx.iocs().lookup_host("203.0.113.8").await.unwrap().is_none());
}

// ── browser events ──────────────────────────────────────────────────

#[sqlx::test]
async fn batch_insert_and_mark_processed_round_trip(pool: PgPool) {
    let ctx = helpers::make_ctx(&pool);

    let session_id = uuid::Uuid::new_v4();
    let new_events: Vec<_> = (0..3)
        .map(|i| merrymaker::db::browser_events::NewEvent {
            session_id,
            source_job_id: None,
            event_type: "Network.request".into(),
            event_data: serde_json::json!({"request": {"url": format!("https://h{i}.test/")}}),
            metadata: serde_json::json!({}),
            priority: 50,
            should_process: true,
            storage_key: None,
        })
        .collect();

    let inserted = ctx.browser_events().insert_batch(&new_events).await.unwrap();
    assert_eq!(inserted.len(), 3);

    let unprocessed = ctx.browser_events().unprocessed(10).await.unwrap();
    assert_eq!(unprocessed.len(), 3);

    let ids: Vec<_> = inserted.iter().map(|event| event.id).collect();
    assert_eq!(ctx.browser_events().mark_processed(&ids).await.unwrap(), 3);
    assert!(ctx.browser_events().unprocessed(10).await.unwrap().is_empty());

    let reloaded = ctx.browser_events().fetch_by_ids(&ids).await.unwrap();
    assert!(reloaded.iter().all(|event| event.processed));
}

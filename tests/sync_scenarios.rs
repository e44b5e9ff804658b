//! Replay and conflict scenarios driven through [`OfflineService`].
//!
//! Mutations are queued the way the app produces them (a write while
//! offline, or records staged by a collaborator) and replayed against a
//! scripted remote.
//!
//! # Running
//! ```bash
//! cargo test --test sync_scenarios
//! ```

mod common;

use std::time::Duration;

use offline_core::http::{HttpMethod, RequestDescriptor};
use offline_core::queue::RESOLUTION_HEADER;
use offline_core::transport::Reply;
use offline_core::{
    ConflictKind, ConflictPolicy, DomainConfig, ManualResolution, OfflineConfig, OfflineService, Resolution,
    SyncRecord,
};
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;

use common::{fast_config, init_tracing, open_service};

async fn queue_offline(service: &OfflineService, method: HttpMethod, url: &str, body: Value) {
    service.set_online(false);
    let response = service
        .handle(RequestDescriptor::new(method, url).with_json(&body))
        .await;
    assert_eq!(response.status, 202);
    service.set_online(true);
}

async fn queue_offline_put(service: &OfflineService, url: &str, body: Value) {
    queue_offline(service, HttpMethod::Put, url, body).await;
}

fn last_body(sent: &[RequestDescriptor]) -> Value {
    let last = sent.last().expect("at least one request sent");
    serde_json::from_slice(last.body.as_deref().expect("request has a body")).unwrap()
}

// =============================================================================
// Replay
// =============================================================================

#[tokio::test]
async fn happy_transient_failures_are_absorbed_within_one_run() {
    init_tracing();
    let (service, transport) = open_service(fast_config(None)).await;
    queue_offline_put(&service, "/api/alarms/7", json!({"hour": 7})).await;

    transport
        .once(HttpMethod::Put, "/api/alarms/7", Reply::Fail("connection reset".into()))
        .once(HttpMethod::Put, "/api/alarms/7", Reply::Fail("connection reset".into()))
        .always(HttpMethod::Put, "/api/alarms/7", Reply::status(204));

    let run = service.sync_domain("alarms").await.unwrap().unwrap();
    assert_eq!((run.succeeded, run.failed, run.conflicted), (1, 0, 0));
    assert_eq!(transport.count(HttpMethod::Put, "/api/alarms/7"), 3);
    assert_eq!(service.queue_stats().await.unwrap().total_queued(), 0);
    assert_eq!(service.sync_history().len(), 1);
}

#[tokio::test]
async fn failure_attempts_are_bounded_and_item_stays_queued() {
    let (service, transport) = open_service(fast_config(None)).await;
    queue_offline_put(&service, "/api/alarms/2", json!({"hour": 2})).await;
    transport.always(HttpMethod::Put, "/api/alarms/2", Reply::status(503));

    let run = service.sync_domain("alarms").await.unwrap().unwrap();
    assert_eq!((run.succeeded, run.failed), (0, 1));
    assert_eq!(transport.count(HttpMethod::Put, "/api/alarms/2"), 3);

    let stats = service.queue_stats().await.unwrap();
    assert_eq!(stats.domain("alarms").map(|d| d.pending), Some(1));

    // The next run tries again from scratch
    let again = service.sync_domain("alarms").await.unwrap().unwrap();
    assert_eq!(again.failed, 1);
    assert_eq!(transport.count(HttpMethod::Put, "/api/alarms/2"), 6);
    assert_eq!(service.sync_history().len(), 2);
}

#[tokio::test]
async fn failure_hung_request_times_out_as_a_failed_attempt() {
    let config = OfflineConfig {
        max_replay_attempts: 1,
        network_timeout_ms: 50,
        ..fast_config(None)
    };
    let (service, transport) = open_service(config).await;
    queue_offline_put(&service, "/api/alarms/3", json!({"hour": 3})).await;
    transport.always(HttpMethod::Put, "/api/alarms/3", Reply::Hang);

    let run = tokio::time::timeout(Duration::from_secs(5), service.sync_domain("alarms"))
        .await
        .expect("drain finishes despite the hung request")
        .unwrap()
        .unwrap();
    assert_eq!(run.failed, 1);
}

#[tokio::test]
async fn happy_sync_all_drains_each_domain_in_order() {
    let (service, transport) = open_service(fast_config(None)).await;
    service.set_online(false);
    for (method, url) in [(HttpMethod::Put, "/api/settings/theme"), (HttpMethod::Delete, "/api/alarms/1")] {
        let mut request = RequestDescriptor::new(method, url);
        if method == HttpMethod::Put {
            request = request.with_json(&json!({"value": "dark"}));
        }
        assert_eq!(service.handle(request).await.status, 202);
    }
    service.set_online(true);

    transport
        .always(HttpMethod::Put, "/api/settings/theme", Reply::status(200))
        .always(HttpMethod::Delete, "/api/alarms/1", Reply::status(404));

    let runs = service.sync_all().await.unwrap();
    let domains: Vec<&str> = runs.iter().map(|r| r.domain.as_str()).collect();
    assert_eq!(domains, vec!["settings", "alarms"]);
    assert!(runs.iter().all(|r| r.succeeded == 1));
}

#[tokio::test]
async fn happy_staged_records_are_confirmed_with_server_copy() {
    let (service, transport) = open_service(fast_config(None)).await;
    let record = SyncRecord::new("alarms", "11", json!({"hour": 11, "lastModified": 100}));
    assert_eq!(service.stage_for_sync("alarms", vec![record]).await.unwrap(), 1);
    assert_eq!(service.unsynced_records("alarms").await.unwrap().len(), 1);

    // Server echoes its own (older-stamped) copy: not a conflict
    transport.always(
        HttpMethod::Put,
        "/api/alarms/11",
        Reply::json(200, &json!({"hour": 11, "lastModified": 100})),
    );
    let run = service.sync_domain("alarms").await.unwrap().unwrap();
    assert_eq!((run.succeeded, run.conflicted), (1, 0));
    assert!(service.unsynced_records("alarms").await.unwrap().is_empty());
}

#[tokio::test]
async fn happy_created_record_echo_is_not_resent() {
    let (service, transport) = open_service(fast_config(None)).await;
    queue_offline(&service, HttpMethod::Post, "/api/alarms", json!({"hour": 7})).await;

    // The server assigns an id and a marker to the new record
    transport.always(
        HttpMethod::Post,
        "/api/alarms",
        Reply::json(201, &json!({"id": 42, "hour": 7, "lastModified": 1000})),
    );

    let run = service.sync_domain("alarms").await.unwrap().unwrap();
    assert_eq!((run.succeeded, run.conflicted), (1, 0));
    assert_eq!(transport.count(HttpMethod::Post, "/api/alarms"), 1);
    assert_eq!(service.queue_stats().await.unwrap().total_queued(), 0);
}

#[tokio::test]
async fn happy_server_stamped_echo_is_accepted_under_manual_policy() {
    let config = OfflineConfig {
        conflict_policy: ConflictPolicy::Manual,
        ..fast_config(None)
    };
    let (service, transport) = open_service(config).await;
    queue_offline_put(&service, "/api/alarms/7", json!({"hour": 7, "lastModified": 100})).await;

    // Write applied: marker bumped, audit field added, our fields untouched
    transport.always(
        HttpMethod::Put,
        "/api/alarms/7",
        Reply::json(200, &json!({"hour": 7, "updatedBy": "server", "lastModified": 200})),
    );

    let run = service.sync_domain("alarms").await.unwrap().unwrap();
    assert_eq!((run.succeeded, run.conflicted, run.deferred), (1, 0, 0));
    assert!(service.deferred_conflicts().await.unwrap().is_empty());
    assert_eq!(transport.count(HttpMethod::Put, "/api/alarms/7"), 1);
}

#[tokio::test]
async fn failure_undecodable_queued_row_is_dropped_and_the_rest_replays() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    {
        let (service, _transport) = open_service(fast_config(Some(dir.path()))).await;
        queue_offline_put(&service, "/api/alarms/1", json!({"hour": 1})).await;
        queue_offline_put(&service, "/api/alarms/2", json!({"hour": 2})).await;
        service.shutdown().await;
    }

    // Damage the first row on disk
    let pool = sqlx::SqlitePool::connect_with(SqliteConnectOptions::new().filename(dir.path().join("mutations.db")))
        .await
        .unwrap();
    let updated = sqlx::query("UPDATE mutations SET headers = 'not json' WHERE url = ?")
        .bind("/api/alarms/1")
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(updated.rows_affected(), 1);
    pool.close().await;

    let (service, transport) = open_service(fast_config(Some(dir.path()))).await;
    transport.always(HttpMethod::Put, "/api/alarms/2", Reply::status(204));

    let run = service.sync_domain("alarms").await.unwrap().unwrap();
    assert_eq!((run.succeeded, run.failed, run.dropped), (1, 0, 1));
    assert_eq!(transport.count(HttpMethod::Put, "/api/alarms/1"), 0);
    assert_eq!(transport.count(HttpMethod::Put, "/api/alarms/2"), 1);
    assert_eq!(service.queue_stats().await.unwrap().total_queued(), 0);

    // Later runs are not blocked either
    let again = service.sync_domain("alarms").await.unwrap().unwrap();
    assert_eq!((again.succeeded, again.dropped), (0, 0));
    service.shutdown().await;
}

#[tokio::test]
async fn failure_staging_for_unknown_domain_is_rejected() {
    let (service, _transport) = open_service(fast_config(None)).await;
    let err = service
        .stage_for_sync("weather", vec![SyncRecord::new("weather", "1", json!({}))])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "config");
}

// =============================================================================
// Conflict policies
// =============================================================================

#[tokio::test]
async fn happy_merge_policy_combines_both_sides() {
    let (service, transport) = open_service(fast_config(None)).await;
    queue_offline_put(
        &service,
        "/api/alarms/7",
        json!({"label": "Gym", "days": ["mon"], "lastModified": 100}),
    )
    .await;
    transport
        .once(
            HttpMethod::Put,
            "/api/alarms/7",
            Reply::json(409, &json!({"label": "Run", "days": ["tue"], "volume": 4, "lastModified": 200})),
        )
        .always(HttpMethod::Put, "/api/alarms/7", Reply::status(204));

    let run = service.sync_domain("alarms").await.unwrap().unwrap();
    assert_eq!((run.conflicted, run.deferred), (1, 0));
    assert_eq!(run.resolved(), 1);
    assert_eq!(run.conflicts[0].kind, ConflictKind::ConcurrentlyModified);

    let sent = transport.sent();
    assert_eq!(sent.last().unwrap().header(RESOLUTION_HEADER), Some("merged"));
    let merged = last_body(&sent);
    assert_eq!(merged["label"], "Run");
    assert_eq!(merged["days"], json!(["mon", "tue"]));
    assert_eq!(merged["volume"], 4);
    assert_eq!(service.queue_stats().await.unwrap().total_queued(), 0);
}

#[tokio::test]
async fn happy_domain_override_beats_global_policy() {
    let config = OfflineConfig {
        conflict_policy: ConflictPolicy::Client,
        domains: vec![
            DomainConfig::new("alarms", r"^/api/alarms(?:/|$)", "/api/alarms").with_policy(ConflictPolicy::Server),
            DomainConfig::new("settings", r"^/api/settings(?:/|$)", "/api/settings"),
        ],
        ..fast_config(None)
    };
    let (service, transport) = open_service(config).await;
    queue_offline_put(&service, "/api/alarms/1", json!({"hour": 1, "lastModified": 1})).await;
    queue_offline_put(&service, "/api/settings/tone", json!({"tone": "bell", "lastModified": 1})).await;

    transport
        .always(HttpMethod::Put, "/api/alarms/1", Reply::json(409, &json!({"hour": 2, "lastModified": 9})))
        .once(HttpMethod::Put, "/api/settings/tone", Reply::json(409, &json!({"tone": "chime", "lastModified": 9})))
        .always(HttpMethod::Put, "/api/settings/tone", Reply::status(204));

    let alarms = service.sync_domain("alarms").await.unwrap().unwrap();
    assert_eq!(alarms.conflicts[0].resolution, Resolution::Server);
    assert_eq!(transport.count(HttpMethod::Put, "/api/alarms/1"), 1);

    let settings = service.sync_domain("settings").await.unwrap().unwrap();
    assert_eq!(settings.conflicts[0].resolution, Resolution::Client);
    let sent = transport.sent();
    assert_eq!(sent.last().unwrap().header(RESOLUTION_HEADER), Some("client"));
    assert_eq!(last_body(&sent)["tone"], "bell");

    assert_eq!(service.queue_stats().await.unwrap().total_queued(), 0);
}

#[tokio::test]
async fn failure_schema_mismatch_is_deferred_under_merge() {
    let (service, transport) = open_service(fast_config(None)).await;
    queue_offline_put(&service, "/api/alarms/4", json!({"hour": 4, "schemaVersion": 1})).await;
    transport.always(
        HttpMethod::Put,
        "/api/alarms/4",
        Reply::json(409, &json!({"hour": 5, "schemaVersion": 2})),
    );

    let run = service.sync_domain("alarms").await.unwrap().unwrap();
    assert_eq!(run.deferred, 1);
    assert!(run.has_unresolved());
    assert_eq!(run.conflicts[0].kind, ConflictKind::SchemaMismatch);

    let stats = service.queue_stats().await.unwrap();
    assert_eq!(stats.domain("alarms").map(|d| d.deferred), Some(1));
}

// =============================================================================
// Manual resolution
// =============================================================================

#[tokio::test]
async fn happy_manual_accept_remote_adopts_server_record() {
    let config = OfflineConfig {
        conflict_policy: ConflictPolicy::Manual,
        ..fast_config(None)
    };
    let (service, transport) = open_service(config).await;
    let mut updates = service.subscribe();

    let local = SyncRecord::new("alarms", "5", json!({"hour": 5, "lastModified": 10}));
    service.stage_for_sync("alarms", vec![local]).await.unwrap();
    let remote = json!({"hour": 6, "lastModified": 20});
    transport.always(HttpMethod::Put, "/api/alarms/5", Reply::json(409, &remote));

    let run = service.sync_domain("alarms").await.unwrap().unwrap();
    assert_eq!(run.deferred, 1);
    assert_eq!(updates.recv().await.unwrap().id, run.id);

    let conflicts = service.deferred_conflicts().await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].item_id, "5");
    assert_eq!(conflicts[0].remote_version.as_ref(), Some(&remote));

    let resolution = service
        .resolve_conflict(&conflicts[0].id, ManualResolution::AcceptRemote)
        .await
        .unwrap();
    assert_eq!(resolution, Some(Resolution::Server));
    assert!(service.deferred_conflicts().await.unwrap().is_empty());
    assert!(service.unsynced_records("alarms").await.unwrap().is_empty());
    assert_eq!(service.queue_stats().await.unwrap().total_queued(), 0);
}

#[tokio::test]
async fn happy_manual_replace_sends_supplied_payload_next_run() {
    let config = OfflineConfig {
        conflict_policy: ConflictPolicy::Manual,
        ..fast_config(None)
    };
    let (service, transport) = open_service(config).await;
    queue_offline_put(&service, "/api/alarms/9", json!({"hour": 9})).await;
    transport
        .once(HttpMethod::Put, "/api/alarms/9", Reply::json(409, &json!({"hour": 10})))
        .always(HttpMethod::Put, "/api/alarms/9", Reply::status(204));
    service.sync_domain("alarms").await.unwrap();

    let conflict = service.deferred_conflicts().await.unwrap().remove(0);
    let chosen = json!({"hour": 9, "minute": 45});
    let resolution = service
        .resolve_conflict(&conflict.id, ManualResolution::Replace(chosen.clone()))
        .await
        .unwrap();
    assert_eq!(resolution, Some(Resolution::Merged));

    let run = service.sync_domain("alarms").await.unwrap().unwrap();
    assert_eq!(run.succeeded, 1);
    let sent = transport.sent();
    assert_eq!(sent.last().unwrap().header(RESOLUTION_HEADER), Some("merged"));
    assert_eq!(last_body(&sent), chosen);
}

#[tokio::test]
async fn failure_resolving_unknown_conflict_returns_none() {
    let (service, _transport) = open_service(fast_config(None)).await;
    let resolution = service
        .resolve_conflict("no-such-conflict", ManualResolution::KeepLocal)
        .await
        .unwrap();
    assert!(resolution.is_none());
}

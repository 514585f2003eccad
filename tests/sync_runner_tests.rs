//! End-to-end orchestrator tests against a mock GitHub API and the
//! in-memory store.

mod test_utils;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use orgpulse::store::{SyncStatus, SyncType};
use orgpulse::sync::SyncRequest;
use test_utils::{build_runner, mount_widgets_fixture, pull_json, MemoryStore};

fn full_request() -> SyncRequest {
    SyncRequest {
        sync_type: SyncType::Full,
        organizations: None,
    }
}

#[tokio::test]
async fn full_sync_ingests_all_entity_types() {
    let server = MockServer::start().await;
    mount_widgets_fixture(&server).await;

    let store = MemoryStore::new();
    let runner = build_runner(store.clone(), &server.uri());

    let outcome = runner
        .run(full_request(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, SyncStatus::Success);
    // One repository, three commits, two pull requests.
    assert_eq!(outcome.items_processed, 6);
    assert!(outcome.error_summary.is_empty());

    assert_eq!(store.repo_count(), 1);
    assert_eq!(store.commit_count(), 3);
    assert_eq!(store.pull_count(), 2);
    assert_eq!(store.contributor_stat_count(), 2);
    assert_eq!(store.pull_state(2).as_deref(), Some("merged"));

    let logs = store.sync_logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, SyncStatus::Success);
    assert_eq!(logs[0].items_processed, 6);
    assert!(logs[0].finished_at.is_some());
    assert!(logs[0].since_cursor.is_some());

    // Daily stats cover every touched date.
    let daily = store.daily_stats();
    assert!(!daily.is_empty());
    let june_9 = daily
        .iter()
        .find(|d| d.date == chrono::NaiveDate::from_ymd_opt(2024, 6, 9).unwrap())
        .expect("june 9 aggregated");
    assert_eq!(june_9.commit_count, 2);
    assert_eq!(june_9.pr_merged_count, 1);
}

#[tokio::test]
async fn repeated_runs_are_idempotent() {
    let server = MockServer::start().await;
    mount_widgets_fixture(&server).await;

    let store = MemoryStore::new();
    let runner = build_runner(store.clone(), &server.uri());

    runner
        .run(full_request(), CancellationToken::new())
        .await
        .unwrap();
    let second = runner
        .run(full_request(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.status, SyncStatus::Success);
    assert_eq!(store.repo_count(), 1);
    assert_eq!(store.commit_count(), 3);
    assert_eq!(store.pull_count(), 2);
    assert_eq!(store.sync_logs().len(), 2);
}

#[tokio::test]
async fn failed_commit_listing_degrades_to_partial_failure() {
    let server = MockServer::start().await;

    // Mounted first so it wins over the fixture's commits endpoint.
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/commits"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    mount_widgets_fixture(&server).await;

    let store = MemoryStore::new();
    let runner = build_runner(store.clone(), &server.uri());

    let outcome = runner
        .run(full_request(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, SyncStatus::PartialFailure);
    assert!(outcome
        .error_summary
        .iter()
        .any(|e| e.contains("commits acme/widgets")));

    // The other entity types still landed.
    assert_eq!(store.commit_count(), 0);
    assert_eq!(store.pull_count(), 2);
    assert_eq!(store.contributor_stat_count(), 2);
}

#[tokio::test]
async fn unreachable_repository_listing_fails_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let runner = build_runner(store.clone(), &server.uri());

    let outcome = runner
        .run(full_request(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, SyncStatus::Failed);
    assert_eq!(outcome.items_processed, 0);
    assert!(!outcome.error_summary.is_empty());

    let logs = store.sync_logs();
    assert_eq!(logs[0].status, SyncStatus::Failed);
    assert_eq!(logs[0].items_processed, 0);
}

#[tokio::test]
async fn incremental_run_resumes_from_cursor_and_refreshes_state() {
    let server = MockServer::start().await;
    // The full run observes the repository pushed_at as its newest
    // confirmed timestamp, which becomes the incremental cursor.
    let cursor = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();

    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            test_utils::widgets_repo_json()
        ])))
        .mount(&server)
        .await;

    // The incremental commit listing must carry the cursor as its lower
    // bound; the full run's listing has no since parameter and falls
    // through to the catch-all below.
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/commits"))
        .and(query_param("since", cursor.to_rfc3339()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            test_utils::commit_json("ddd444", "jan", "2024-06-11T10:00:00Z")
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/commits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    // Pull request 1 is open during the full run and merged by the time
    // the incremental run re-fetches it.
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/pulls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            pull_json(1, "open", None, "2024-06-09T11:00:00Z")
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/pulls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            pull_json(1, "closed", Some("2024-06-11T12:00:00Z"), "2024-06-11T12:00:00Z")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/stats/contributors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let runner = build_runner(store.clone(), &server.uri());

    let first = runner
        .run(full_request(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.status, SyncStatus::Success);
    assert_eq!(store.pull_state(1).as_deref(), Some("open"));
    assert_eq!(
        store.sync_logs()[0].since_cursor,
        Some(cursor),
        "full run should confirm the repository pushed_at as cursor"
    );

    let second = runner
        .run(
            SyncRequest {
                sync_type: SyncType::Incremental,
                organizations: None,
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(second.status, SyncStatus::Success);
    // Re-ingestion overwrote the stale open row.
    assert_eq!(store.pull_state(1).as_deref(), Some("merged"));
    assert_eq!(store.pull_count(), 1);

    let latest = store
        .sync_logs()
        .into_iter()
        .find(|log| log.id == second.sync_log_id)
        .unwrap();
    assert_eq!(
        latest.since_cursor,
        Some(Utc.with_ymd_and_hms(2024, 6, 11, 12, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn requested_org_outside_configuration_is_rejected() {
    let server = MockServer::start().await;
    let store = MemoryStore::new();
    let runner = build_runner(store.clone(), &server.uri());

    let outcome = runner
        .run(
            SyncRequest {
                sync_type: SyncType::Full,
                organizations: Some(vec!["unknown-org".to_string()]),
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.status, SyncStatus::Failed);
    assert_eq!(outcome.items_processed, 0);
}

#[tokio::test]
async fn cancellation_during_a_fetch_stops_further_api_calls() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            test_utils::widgets_repo_json()
        ])))
        .mount(&server)
        .await;

    // A slow commit listing; the token fires while it is in flight.
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/commits"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    // No request may reach the later entity types after cancellation.
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/pulls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/stats/contributors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let runner = build_runner(store.clone(), &server.uri());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = runner.run(full_request(), cancel).await.unwrap();

    assert_eq!(outcome.status, SyncStatus::PartialFailure);
    assert!(outcome
        .error_summary
        .iter()
        .any(|e| e.contains("cancelled")));
    // The repository row landed before cancellation; nothing else did.
    assert_eq!(store.repo_count(), 1);
    assert_eq!(store.commit_count(), 0);
    assert_eq!(store.pull_count(), 0);
}

#[tokio::test]
async fn cancelled_run_finishes_as_partial_failure() {
    let server = MockServer::start().await;
    mount_widgets_fixture(&server).await;

    let store = MemoryStore::new();
    let runner = build_runner(store.clone(), &server.uri());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = runner.run(full_request(), cancel).await.unwrap();

    assert_eq!(outcome.status, SyncStatus::PartialFailure);
    assert!(outcome
        .error_summary
        .iter()
        .any(|e| e.contains("cancelled")));

    let logs = store.sync_logs();
    assert_eq!(logs[0].status, SyncStatus::PartialFailure);
    assert!(logs[0].finished_at.is_some());
}

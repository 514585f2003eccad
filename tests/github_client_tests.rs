//! Client behavior against a mock GitHub API: pagination, retry triage,
//! and rate-limit gating.

mod test_utils;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use orgpulse::github::{FetchError, GithubClient, RateLimiter};
use test_utils::{commit_json, fast_backoff, github_config, widgets_repo_json};

fn build_client(api_base: &str) -> (GithubClient, Arc<RateLimiter>) {
    let limiter = Arc::new(RateLimiter::new(0.02));
    let client = GithubClient::new(
        &github_config(api_base),
        fast_backoff(),
        Arc::clone(&limiter),
    )
    .expect("client builds");
    (client, limiter)
}

#[tokio::test]
async fn follows_link_headers_and_visits_each_page_once() {
    let server = MockServer::start().await;

    let next = format!("{}/orgs/acme/repos?page=2", server.uri());
    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 102,
                "name": "gadgets",
                "full_name": "acme/gadgets",
                "private": true,
                "default_branch": "main",
                "pushed_at": null
            }
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", format!("<{next}>; rel=\"next\"").as_str())
                .set_body_json(json!([widgets_repo_json()])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = build_client(&server.uri());
    let repos = client.list_org_repos("acme").await.unwrap();

    assert_eq!(repos.len(), 2);
    assert_eq!(repos[0].full_name, "acme/widgets");
    assert_eq!(repos[1].full_name, "acme/gadgets");
}

#[tokio::test]
async fn transient_server_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/commits"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/commits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            commit_json("aaa111", "jan", "2024-06-10T10:00:00Z")
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = build_client(&server.uri());
    let commits = client.list_commits("acme/widgets", None).await.unwrap();
    assert_eq!(commits.len(), 1);
}

#[tokio::test]
async fn permanent_client_errors_fail_without_retry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/missing/commits"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = build_client(&server.uri());
    let err = client.list_commits("acme/missing", None).await.unwrap_err();
    assert!(matches!(err, FetchError::Permanent { status: 404, .. }));
}

#[tokio::test]
async fn empty_repository_conflict_yields_no_commits() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/empty/commits"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let (client, _) = build_client(&server.uri());
    let commits = client.list_commits("acme/empty", None).await.unwrap();
    assert!(commits.is_empty());
}

#[tokio::test]
async fn throttle_response_suspends_until_reset_then_retries() {
    let server = MockServer::start().await;
    let reset = Utc::now().timestamp();

    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-limit", "5000")
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", reset.to_string().as_str()),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([widgets_repo_json()])))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = build_client(&server.uri());
    let started = Instant::now();
    let repos = client.list_org_repos("acme").await.unwrap();

    assert_eq!(repos.len(), 1);
    // One second of slack past the already-elapsed reset.
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn exhausted_budget_delays_the_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let (client, limiter) = build_client(&server.uri());
    limiter.record(5000, 0, Utc::now() + chrono::Duration::seconds(1));

    let started = Instant::now();
    let repos = client.list_org_repos("acme").await.unwrap();

    assert!(repos.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn quota_headers_feed_the_shared_limiter() {
    let server = MockServer::start().await;
    let reset = Utc::now().timestamp() + 1800;

    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-limit", "5000")
                .insert_header("x-ratelimit-remaining", "1234")
                .insert_header("x-ratelimit-reset", reset.to_string().as_str())
                .set_body_json(json!([])),
        )
        .mount(&server)
        .await;

    let (client, limiter) = build_client(&server.uri());
    client.list_org_repos("acme").await.unwrap();

    let snapshot = limiter.snapshot();
    assert_eq!(snapshot.remaining, 1234);
    assert_eq!(snapshot.reset_at.timestamp(), reset);
}

#[tokio::test]
async fn rate_limit_endpoint_reports_the_core_window() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rate_limit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resources": {
                "core": { "limit": 5000, "remaining": 4211, "reset": 1735689600 }
            }
        })))
        .mount(&server)
        .await;

    let (client, _) = build_client(&server.uri());
    let response = client.get_rate_limit().await.unwrap();
    assert_eq!(response.resources.core.remaining, 4211);
    assert_eq!(response.resources.core.reset, 1_735_689_600);
}

#[tokio::test]
async fn transient_retries_are_bounded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let (client, _) = build_client(&server.uri());
    let err = client.list_org_repos("acme").await.unwrap_err();
    assert!(matches!(err, FetchError::Transient { .. }));
}

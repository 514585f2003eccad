//! Shared helpers for integration tests: an in-memory store and wiremock
//! fixtures for the GitHub endpoints the sync engine calls.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use orgpulse::config::{BackoffConfig, GithubConfig, SyncConfig};
use orgpulse::github::{GithubClient, RateLimiter};
use orgpulse::store::{
    CommitUpsert, ContributorStatsUpsert, DailyStatsUpsert, OrganizationUpsert, PullRequestUpsert,
    RepositoryUpsert, Store, StoreError, SyncLogRecord, SyncLogUpdate, SyncStatus, SyncType,
};
use orgpulse::sync::SyncRunner;

#[derive(Default)]
struct Inner {
    organizations: BTreeMap<String, (Uuid, bool)>,
    repositories: BTreeMap<i64, (Uuid, RepositoryUpsert)>,
    commits: BTreeMap<(Uuid, String), CommitUpsert>,
    pulls: BTreeMap<(Uuid, i64), PullRequestUpsert>,
    contributor_stats: BTreeMap<(Uuid, String, i64), ContributorStatsUpsert>,
    daily_stats: BTreeMap<(Uuid, NaiveDate), DailyStatsUpsert>,
    sync_logs: Vec<SyncLogRecord>,
}

/// In-memory [`Store`] with introspection methods for assertions.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn repo_count(&self) -> usize {
        self.inner.lock().unwrap().repositories.len()
    }

    pub fn commit_count(&self) -> usize {
        self.inner.lock().unwrap().commits.len()
    }

    pub fn pull_count(&self) -> usize {
        self.inner.lock().unwrap().pulls.len()
    }

    pub fn contributor_stat_count(&self) -> usize {
        self.inner.lock().unwrap().contributor_stats.len()
    }

    pub fn pull_state(&self, number: i64) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .pulls
            .iter()
            .find(|((_, n), _)| *n == number)
            .map(|(_, pr)| pr.state.clone())
    }

    pub fn daily_stats(&self) -> Vec<DailyStatsUpsert> {
        self.inner.lock().unwrap().daily_stats.values().cloned().collect()
    }

    pub fn sync_logs(&self) -> Vec<SyncLogRecord> {
        self.inner.lock().unwrap().sync_logs.clone()
    }

    /// Seed a finished run so incremental tests have a cursor to resume from.
    pub fn seed_finished_log(&self, cursor: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        inner.sync_logs.push(SyncLogRecord {
            id: Uuid::new_v4(),
            sync_type: SyncType::Full,
            status: SyncStatus::Success,
            started_at: cursor,
            finished_at: Some(cursor),
            items_processed: 0,
            error_summary: Vec::new(),
            since_cursor: Some(cursor),
        });
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_organization(&self, org: OrganizationUpsert) -> Result<Uuid, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .organizations
            .entry(org.login)
            .or_insert_with(|| (Uuid::new_v4(), org.legacy_configured));
        entry.1 = org.legacy_configured;
        Ok(entry.0)
    }

    async fn upsert_repository(&self, repo: RepositoryUpsert) -> Result<Uuid, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner
            .repositories
            .get(&repo.github_id)
            .map(|(id, _)| *id)
            .unwrap_or_else(Uuid::new_v4);
        inner.repositories.insert(repo.github_id, (id, repo));
        Ok(id)
    }

    async fn upsert_commit(&self, commit: CommitUpsert) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .commits
            .insert((commit.repo_id, commit.sha.clone()), commit);
        Ok(())
    }

    async fn upsert_pull_request(&self, pr: PullRequestUpsert) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.pulls.insert((pr.repo_id, pr.number), pr);
        Ok(())
    }

    async fn upsert_contributor_stats(
        &self,
        row: ContributorStatsUpsert,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.contributor_stats.insert(
            (row.repo_id, row.login.clone(), row.week_bucket.timestamp()),
            row,
        );
        Ok(())
    }

    async fn upsert_daily_stats(&self, row: DailyStatsUpsert) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.daily_stats.insert((row.org_id, row.date), row);
        Ok(())
    }

    async fn collect_daily_stats(
        &self,
        org_id: Uuid,
        date: NaiveDate,
    ) -> Result<DailyStatsUpsert, StoreError> {
        let inner = self.inner.lock().unwrap();
        let repo_ids: Vec<Uuid> = inner
            .repositories
            .values()
            .filter(|(_, repo)| repo.org_id == org_id)
            .map(|(id, _)| *id)
            .collect();

        let commit_count = inner
            .commits
            .values()
            .filter(|c| repo_ids.contains(&c.repo_id) && c.committed_at.date_naive() == date)
            .count() as i32;
        let pr_opened_count = inner
            .pulls
            .values()
            .filter(|p| repo_ids.contains(&p.repo_id) && p.created_at.date_naive() == date)
            .count() as i32;
        let pr_merged_count = inner
            .pulls
            .values()
            .filter(|p| {
                repo_ids.contains(&p.repo_id)
                    && p.merged_at.is_some_and(|m| m.date_naive() == date)
            })
            .count() as i32;

        Ok(DailyStatsUpsert {
            org_id,
            date,
            commit_count,
            pr_opened_count,
            pr_merged_count,
        })
    }

    async fn create_sync_log(
        &self,
        sync_type: SyncType,
        started_at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        let mut inner = self.inner.lock().unwrap();
        inner.sync_logs.push(SyncLogRecord {
            id,
            sync_type,
            status: SyncStatus::Running,
            started_at,
            finished_at: None,
            items_processed: 0,
            error_summary: Vec::new(),
            since_cursor: None,
        });
        Ok(id)
    }

    async fn finalize_sync_log(&self, update: SyncLogUpdate) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let log = inner
            .sync_logs
            .iter_mut()
            .find(|log| log.id == update.id)
            .ok_or_else(|| StoreError::Other("sync log not found".to_string()))?;
        log.status = update.status;
        log.finished_at = Some(update.finished_at);
        log.items_processed = update.items_processed;
        log.error_summary = update.error_summary;
        log.since_cursor = update.since_cursor;
        Ok(())
    }

    async fn latest_finished_sync_log(&self) -> Result<Option<SyncLogRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sync_logs
            .iter()
            .filter(|log| {
                matches!(log.status, SyncStatus::Success | SyncStatus::PartialFailure)
            })
            .max_by_key(|log| log.started_at)
            .cloned())
    }

    async fn get_sync_log(&self, id: Uuid) -> Result<Option<SyncLogRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.sync_logs.iter().find(|log| log.id == id).cloned())
    }

    async fn list_sync_logs(&self, limit: u64) -> Result<Vec<SyncLogRecord>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut logs = inner.sync_logs.clone();
        logs.sort_by_key(|log| std::cmp::Reverse(log.started_at));
        logs.truncate(limit as usize);
        Ok(logs)
    }
}

pub fn github_config(api_base: &str) -> GithubConfig {
    GithubConfig {
        token: "ghp_test".to_string(),
        api_base: api_base.trim_end_matches('/').to_string(),
        organizations: vec!["acme".to_string()],
        legacy_organization: None,
        request_timeout_ms: 5_000,
    }
}

pub fn fast_backoff() -> BackoffConfig {
    BackoffConfig {
        base_ms: 10,
        max_ms: 50,
        max_attempts: 3,
    }
}

pub fn sync_config() -> SyncConfig {
    SyncConfig {
        workers: 2,
        lookback_days: 30,
        error_summary_limit: 10,
        rate_limit_reserve_pct: 0.02,
    }
}

/// Runner wired against a mock server and the given store.
pub fn build_runner(store: Arc<MemoryStore>, api_base: &str) -> SyncRunner {
    let github = github_config(api_base);
    let limiter = Arc::new(RateLimiter::new(0.02));
    let client = Arc::new(
        GithubClient::new(&github, fast_backoff(), limiter).expect("client builds"),
    );
    SyncRunner::new(store, client, github, sync_config())
}

fn ok_json(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("x-ratelimit-limit", "5000")
        .insert_header("x-ratelimit-remaining", "4990")
        .insert_header(
            "x-ratelimit-reset",
            (Utc::now().timestamp() + 3600).to_string().as_str(),
        )
        .set_body_json(body)
}

pub fn widgets_repo_json() -> Value {
    json!({
        "id": 101,
        "name": "widgets",
        "full_name": "acme/widgets",
        "private": false,
        "default_branch": "main",
        "pushed_at": "2024-06-10T12:00:00Z"
    })
}

pub fn commit_json(sha: &str, login: &str, date: &str) -> Value {
    json!({
        "sha": sha,
        "commit": {
            "author": { "name": login, "date": date },
            "committer": { "name": login, "date": date }
        },
        "author": { "login": login }
    })
}

pub fn pull_json(number: i64, state: &str, merged_at: Option<&str>, updated_at: &str) -> Value {
    json!({
        "number": number,
        "state": state,
        "title": format!("change #{number}"),
        "user": { "login": "jan" },
        "created_at": "2024-06-08T09:00:00Z",
        "updated_at": updated_at,
        "closed_at": merged_at,
        "merged_at": merged_at
    })
}

pub fn contributor_stats_json() -> Value {
    json!([
        {
            "author": { "login": "jan" },
            "total": 3,
            "weeks": [
                { "w": 1717891200, "a": 40, "d": 10, "c": 2 },
                { "w": 1718496000, "a": 5, "d": 1, "c": 1 }
            ]
        }
    ])
}

/// Mount the standard acme/widgets fixture: one repository with three
/// commits, one open and one merged pull request, and contributor stats.
pub async fn mount_widgets_fixture(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/orgs/acme/repos"))
        .respond_with(ok_json(json!([widgets_repo_json()])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/commits"))
        .respond_with(ok_json(json!([
            commit_json("aaa111", "jan", "2024-06-10T10:00:00Z"),
            commit_json("bbb222", "jan", "2024-06-09T15:30:00Z"),
            commit_json("ccc333", "sam", "2024-06-09T08:45:00Z"),
        ])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/pulls"))
        .respond_with(ok_json(json!([
            pull_json(1, "open", None, "2024-06-10T11:00:00Z"),
            pull_json(2, "closed", Some("2024-06-09T16:00:00Z"), "2024-06-09T16:00:00Z"),
        ])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/acme/widgets/stats/contributors"))
        .respond_with(ok_json(contributor_stats_json()))
        .mount(server)
        .await;
}

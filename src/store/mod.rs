//! Persistence boundary.
//!
//! The orchestrator talks to storage through the [`Store`] trait so tests
//! can substitute an in-memory implementation. All writes are idempotent
//! upserts keyed by natural keys; see [`sea_orm_store::SeaOrmStore`] for
//! the relational implementation.

pub mod sea_orm_store;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

pub use sea_orm_store::SeaOrmStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] ::sea_orm::DbErr),

    #[error("{0}")]
    Other(String),
}

/// Kind of sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Full,
    Incremental,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Full => "full",
            SyncType::Incremental => "incremental",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full" => Some(SyncType::Full),
            "incremental" => Some(SyncType::Incremental),
            _ => None,
        }
    }
}

/// Lifecycle state of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Running,
    Success,
    PartialFailure,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Success => "success",
            SyncStatus::PartialFailure => "partial_failure",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(SyncStatus::Running),
            "success" => Some(SyncStatus::Success),
            "partial_failure" => Some(SyncStatus::PartialFailure),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

/// Organization row keyed by login.
#[derive(Debug, Clone)]
pub struct OrganizationUpsert {
    pub login: String,
    /// True when the org came from the single-org fallback setting.
    pub legacy_configured: bool,
}

/// Repository row keyed by the upstream numeric id.
#[derive(Debug, Clone)]
pub struct RepositoryUpsert {
    pub github_id: i64,
    pub org_id: Uuid,
    pub name: String,
    pub full_name: String,
    pub default_branch: String,
    pub is_private: bool,
    pub pushed_at: Option<DateTime<Utc>>,
}

/// Commit row keyed by (repo, sha).
#[derive(Debug, Clone, PartialEq)]
pub struct CommitUpsert {
    pub repo_id: Uuid,
    pub sha: String,
    pub author_login: Option<String>,
    pub committed_at: DateTime<Utc>,
    pub additions: i32,
    pub deletions: i32,
}

/// Pull request row keyed by (repo, number). Re-ingestion overwrites.
#[derive(Debug, Clone)]
pub struct PullRequestUpsert {
    pub repo_id: Uuid,
    pub number: i64,
    pub state: String,
    pub title: String,
    pub author_login: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
}

/// Weekly contributor aggregate keyed by (repo, login, week).
#[derive(Debug, Clone)]
pub struct ContributorStatsUpsert {
    pub repo_id: Uuid,
    pub login: String,
    pub week_bucket: DateTime<Utc>,
    pub commit_count: i32,
    pub additions: i32,
    pub deletions: i32,
}

/// Daily organization aggregate keyed by (org, date).
#[derive(Debug, Clone)]
pub struct DailyStatsUpsert {
    pub org_id: Uuid,
    pub date: NaiveDate,
    pub commit_count: i32,
    pub pr_opened_count: i32,
    pub pr_merged_count: i32,
}

/// Finalization payload for a sync log.
#[derive(Debug, Clone)]
pub struct SyncLogUpdate {
    pub id: Uuid,
    pub status: SyncStatus,
    pub finished_at: DateTime<Utc>,
    pub items_processed: i64,
    pub error_summary: Vec<String>,
    pub since_cursor: Option<DateTime<Utc>>,
}

/// Read view of a sync log row.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SyncLogRecord {
    pub id: Uuid,
    pub sync_type: SyncType,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub items_processed: i64,
    pub error_summary: Vec<String>,
    pub since_cursor: Option<DateTime<Utc>>,
}

/// Storage operations used by the sync engine.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns the organization id, creating the row if needed.
    async fn upsert_organization(&self, org: OrganizationUpsert) -> Result<Uuid, StoreError>;

    /// Returns the repository id, creating or updating the row.
    async fn upsert_repository(&self, repo: RepositoryUpsert) -> Result<Uuid, StoreError>;

    async fn upsert_commit(&self, commit: CommitUpsert) -> Result<(), StoreError>;

    async fn upsert_pull_request(&self, pr: PullRequestUpsert) -> Result<(), StoreError>;

    async fn upsert_contributor_stats(&self, row: ContributorStatsUpsert)
        -> Result<(), StoreError>;

    async fn upsert_daily_stats(&self, row: DailyStatsUpsert) -> Result<(), StoreError>;

    /// Recompute the daily aggregate for one organization and date from the
    /// stored commits and pull requests.
    async fn collect_daily_stats(
        &self,
        org_id: Uuid,
        date: NaiveDate,
    ) -> Result<DailyStatsUpsert, StoreError>;

    async fn create_sync_log(
        &self,
        sync_type: SyncType,
        started_at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError>;

    async fn finalize_sync_log(&self, update: SyncLogUpdate) -> Result<(), StoreError>;

    /// Most recent run that finished in success or partial_failure.
    async fn latest_finished_sync_log(&self) -> Result<Option<SyncLogRecord>, StoreError>;

    async fn get_sync_log(&self, id: Uuid) -> Result<Option<SyncLogRecord>, StoreError>;

    /// Recent runs, newest first.
    async fn list_sync_logs(&self, limit: u64) -> Result<Vec<SyncLogRecord>, StoreError>;
}

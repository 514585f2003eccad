//! Raw GitHub API payload shapes.
//!
//! These mirror the wire format and tolerate missing optional fields; the
//! mappers translate them into store records.

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RepoRecord {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    #[serde(rename = "private", default)]
    pub is_private: bool,
    pub default_branch: Option<String>,
    pub pushed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub login: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitActor {
    pub name: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitDetail {
    pub author: Option<GitActor>,
    pub committer: Option<GitActor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitStats {
    #[serde(default)]
    pub additions: i64,
    #[serde(default)]
    pub deletions: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitRecord {
    pub sha: String,
    pub commit: CommitDetail,
    /// GitHub account of the author; null for unmatched email addresses.
    pub author: Option<UserRecord>,
    /// Only present on single-commit responses, absent in list payloads.
    pub stats: Option<CommitStats>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRecord {
    pub number: i64,
    pub state: String,
    pub title: Option<String>,
    pub user: Option<UserRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
}

/// One week bucket from the contributor stats endpoint. Field names are the
/// single letters GitHub uses on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct WeekStat {
    /// Week start as a unix timestamp.
    pub w: i64,
    #[serde(default)]
    pub a: i64,
    #[serde(default)]
    pub d: i64,
    #[serde(default)]
    pub c: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContributorStatsRecord {
    pub author: Option<UserRecord>,
    #[serde(default)]
    pub weeks: Vec<WeekStat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResource {
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp of the window reset.
    pub reset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResources {
    pub core: RateLimitResource,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResponse {
    pub resources: RateLimitResources,
}

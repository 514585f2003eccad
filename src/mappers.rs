//! Pure translation from raw GitHub payloads to store records.
//!
//! Mappers perform no I/O. Optional upstream fields fall back to documented
//! defaults; a payload missing an essential field maps to a [`MapError`]
//! that the orchestrator records against that single item.

use chrono::{TimeZone, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::github::types::{CommitRecord, ContributorStatsRecord, PullRecord, RepoRecord};
use crate::store::{CommitUpsert, ContributorStatsUpsert, PullRequestUpsert, RepositoryUpsert};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

pub fn map_repository(org_id: Uuid, raw: &RepoRecord) -> Result<RepositoryUpsert, MapError> {
    if raw.full_name.is_empty() {
        return Err(MapError::MissingField("full_name"));
    }
    Ok(RepositoryUpsert {
        github_id: raw.id,
        org_id,
        name: raw.name.clone(),
        full_name: raw.full_name.clone(),
        default_branch: raw
            .default_branch
            .clone()
            .unwrap_or_else(|| "main".to_string()),
        is_private: raw.is_private,
        pushed_at: raw.pushed_at,
    })
}

pub fn map_commit(repo_id: Uuid, raw: &CommitRecord) -> Result<CommitUpsert, MapError> {
    if raw.sha.is_empty() {
        return Err(MapError::MissingField("sha"));
    }
    // Prefer the author date; fall back to the committer date for commits
    // rewritten by rebase or cherry-pick tooling.
    let committed_at = raw
        .commit
        .author
        .as_ref()
        .and_then(|a| a.date)
        .or_else(|| raw.commit.committer.as_ref().and_then(|c| c.date))
        .ok_or(MapError::MissingField("commit date"))?;

    let author_login = raw
        .author
        .as_ref()
        .map(|u| u.login.clone())
        .or_else(|| raw.commit.author.as_ref().and_then(|a| a.name.clone()));

    let stats = raw.stats.clone().unwrap_or_default();
    Ok(CommitUpsert {
        repo_id,
        sha: raw.sha.clone(),
        author_login,
        committed_at,
        additions: clamp_count(stats.additions),
        deletions: clamp_count(stats.deletions),
    })
}

pub fn map_pull_request(repo_id: Uuid, raw: &PullRecord) -> Result<PullRequestUpsert, MapError> {
    // Merged pull requests report state "closed" with merged_at set; fold
    // that into a distinct state.
    let state = if raw.merged_at.is_some() {
        "merged"
    } else {
        match raw.state.as_str() {
            "open" => "open",
            "closed" => "closed",
            other => {
                return Err(MapError::InvalidValue {
                    field: "state",
                    value: other.to_string(),
                });
            }
        }
    };

    Ok(PullRequestUpsert {
        repo_id,
        number: raw.number,
        state: state.to_string(),
        title: raw.title.clone().unwrap_or_default(),
        author_login: raw.user.as_ref().map(|u| u.login.clone()),
        created_at: raw.created_at,
        updated_at: raw.updated_at,
        closed_at: raw.closed_at,
        merged_at: raw.merged_at,
    })
}

/// Expand one contributor record into per-week rows, skipping weeks with no
/// activity. Records without an author (anonymous contributors) yield no
/// rows rather than an error.
pub fn map_contributor_stats(
    repo_id: Uuid,
    raw: &ContributorStatsRecord,
) -> Result<Vec<ContributorStatsUpsert>, MapError> {
    let Some(author) = raw.author.as_ref() else {
        return Ok(Vec::new());
    };

    let mut rows = Vec::new();
    for week in &raw.weeks {
        if week.c == 0 && week.a == 0 && week.d == 0 {
            continue;
        }
        let bucket = Utc
            .timestamp_opt(week.w, 0)
            .single()
            .ok_or(MapError::InvalidValue {
                field: "week",
                value: week.w.to_string(),
            })?;
        rows.push(ContributorStatsUpsert {
            repo_id,
            login: author.login.clone(),
            week_bucket: bucket,
            commit_count: clamp_count(week.c),
            additions: clamp_count(week.a),
            deletions: clamp_count(week.d),
        });
    }
    Ok(rows)
}

fn clamp_count(value: i64) -> i32 {
    value.clamp(0, i64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::types::{CommitDetail, CommitStats, GitActor, UserRecord, WeekStat};
    use chrono::DateTime;

    fn repo_id() -> Uuid {
        Uuid::new_v4()
    }

    fn commit_record(sha: &str, date: Option<DateTime<Utc>>) -> CommitRecord {
        CommitRecord {
            sha: sha.to_string(),
            commit: CommitDetail {
                author: Some(GitActor {
                    name: Some("Jan Author".to_string()),
                    date,
                }),
                committer: None,
            },
            author: Some(UserRecord {
                login: "jan".to_string(),
            }),
            stats: None,
        }
    }

    #[test]
    fn repository_defaults_missing_branch_to_main() {
        let raw = RepoRecord {
            id: 42,
            name: "widgets".to_string(),
            full_name: "acme/widgets".to_string(),
            is_private: false,
            default_branch: None,
            pushed_at: None,
        };
        let mapped = map_repository(repo_id(), &raw).unwrap();
        assert_eq!(mapped.default_branch, "main");
        assert_eq!(mapped.github_id, 42);
    }

    #[test]
    fn commit_without_any_date_is_rejected() {
        let raw = commit_record("abc123", None);
        assert_eq!(
            map_commit(repo_id(), &raw),
            Err(MapError::MissingField("commit date"))
        );
    }

    #[test]
    fn commit_falls_back_to_committer_date() {
        let when = Utc.timestamp_opt(1_720_000_000, 0).unwrap();
        let mut raw = commit_record("abc123", None);
        raw.commit.committer = Some(GitActor {
            name: None,
            date: Some(when),
        });
        let mapped = map_commit(repo_id(), &raw).unwrap();
        assert_eq!(mapped.committed_at, when);
    }

    #[test]
    fn commit_without_account_uses_git_author_name() {
        let when = Utc.timestamp_opt(1_720_000_000, 0).unwrap();
        let mut raw = commit_record("abc123", Some(when));
        raw.author = None;
        let mapped = map_commit(repo_id(), &raw).unwrap();
        assert_eq!(mapped.author_login.as_deref(), Some("Jan Author"));
    }

    #[test]
    fn commit_stats_default_to_zero() {
        let when = Utc.timestamp_opt(1_720_000_000, 0).unwrap();
        let raw = commit_record("abc123", Some(when));
        let mapped = map_commit(repo_id(), &raw).unwrap();
        assert_eq!((mapped.additions, mapped.deletions), (0, 0));

        let mut with_stats = commit_record("def456", Some(when));
        with_stats.stats = Some(CommitStats {
            additions: 10,
            deletions: 3,
        });
        let mapped = map_commit(repo_id(), &with_stats).unwrap();
        assert_eq!((mapped.additions, mapped.deletions), (10, 3));
    }

    fn pull_record(state: &str, merged: bool) -> PullRecord {
        let created = Utc.timestamp_opt(1_720_000_000, 0).unwrap();
        PullRecord {
            number: 7,
            state: state.to_string(),
            title: Some("Add pagination".to_string()),
            user: Some(UserRecord {
                login: "jan".to_string(),
            }),
            created_at: created,
            updated_at: Some(created),
            closed_at: merged.then_some(created),
            merged_at: merged.then_some(created),
        }
    }

    #[test]
    fn merged_at_wins_over_reported_state() {
        let mapped = map_pull_request(repo_id(), &pull_record("closed", true)).unwrap();
        assert_eq!(mapped.state, "merged");
    }

    #[test]
    fn open_and_closed_states_pass_through() {
        assert_eq!(
            map_pull_request(repo_id(), &pull_record("open", false))
                .unwrap()
                .state,
            "open"
        );
        assert_eq!(
            map_pull_request(repo_id(), &pull_record("closed", false))
                .unwrap()
                .state,
            "closed"
        );
    }

    #[test]
    fn unknown_pull_state_is_rejected() {
        let result = map_pull_request(repo_id(), &pull_record("draft", false));
        assert!(matches!(result, Err(MapError::InvalidValue { .. })));
    }

    #[test]
    fn missing_pull_title_defaults_to_empty() {
        let mut raw = pull_record("open", false);
        raw.title = None;
        let mapped = map_pull_request(repo_id(), &raw).unwrap();
        assert_eq!(mapped.title, "");
    }

    #[test]
    fn contributor_weeks_without_activity_are_skipped() {
        let raw = ContributorStatsRecord {
            author: Some(UserRecord {
                login: "jan".to_string(),
            }),
            weeks: vec![
                WeekStat {
                    w: 1_719_100_800,
                    a: 0,
                    d: 0,
                    c: 0,
                },
                WeekStat {
                    w: 1_719_705_600,
                    a: 12,
                    d: 4,
                    c: 2,
                },
            ],
        };
        let rows = map_contributor_stats(repo_id(), &raw).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].commit_count, 2);
        assert_eq!(rows[0].week_bucket.timestamp(), 1_719_705_600);
    }

    #[test]
    fn anonymous_contributor_yields_no_rows() {
        let raw = ContributorStatsRecord {
            author: None,
            weeks: vec![WeekStat {
                w: 1_719_705_600,
                a: 1,
                d: 1,
                c: 1,
            }],
        };
        assert!(map_contributor_stats(repo_id(), &raw).unwrap().is_empty());
    }
}

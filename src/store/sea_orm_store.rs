//! SeaORM-backed [`Store`] implementation.
//!
//! Upserts use find-then-write on the natural key. Sync runs are the only
//! writer, so the lookup race is theoretical; the unique indexes reject the
//! duplicate row if it ever happens.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, DatabaseConnection, PaginatorTrait, QueryOrder, QuerySelect};
use uuid::Uuid;

use crate::models::{
    commit, contributor_stat, daily_stat, organization, pull_request, repository, sync_log,
};
use crate::store::{
    CommitUpsert, ContributorStatsUpsert, DailyStatsUpsert, OrganizationUpsert, PullRequestUpsert,
    RepositoryUpsert, Store, StoreError, SyncLogRecord, SyncLogUpdate, SyncStatus, SyncType,
};

#[derive(Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn to_record(model: sync_log::Model) -> SyncLogRecord {
    let error_summary = model
        .error_summary
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    SyncLogRecord {
        id: model.id,
        sync_type: SyncType::parse(&model.sync_type).unwrap_or(SyncType::Full),
        status: SyncStatus::parse(&model.status).unwrap_or(SyncStatus::Failed),
        started_at: model.started_at.with_timezone(&Utc),
        finished_at: model.finished_at.map(|t| t.with_timezone(&Utc)),
        items_processed: model.items_processed,
        error_summary,
        since_cursor: model.since_cursor.map(|t| t.with_timezone(&Utc)),
    }
}

#[async_trait]
impl Store for SeaOrmStore {
    async fn upsert_organization(&self, org: OrganizationUpsert) -> Result<Uuid, StoreError> {
        let now = Utc::now().fixed_offset();
        let existing = organization::Entity::find()
            .filter(organization::Column::Login.eq(org.login.as_str()))
            .one(&self.db)
            .await?;

        match existing {
            Some(model) => {
                let id = model.id;
                if model.legacy_configured != org.legacy_configured {
                    let mut active: organization::ActiveModel = model.into();
                    active.legacy_configured = Set(org.legacy_configured);
                    active.updated_at = Set(now);
                    active.update(&self.db).await?;
                }
                Ok(id)
            }
            None => {
                let id = Uuid::new_v4();
                organization::ActiveModel {
                    id: Set(id),
                    login: Set(org.login),
                    legacy_configured: Set(org.legacy_configured),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&self.db)
                .await?;
                Ok(id)
            }
        }
    }

    async fn upsert_repository(&self, repo: RepositoryUpsert) -> Result<Uuid, StoreError> {
        let now = Utc::now().fixed_offset();
        let existing = repository::Entity::find()
            .filter(repository::Column::GithubId.eq(repo.github_id))
            .one(&self.db)
            .await?;

        match existing {
            Some(model) => {
                let id = model.id;
                let mut active: repository::ActiveModel = model.into();
                active.org_id = Set(repo.org_id);
                active.name = Set(repo.name);
                active.full_name = Set(repo.full_name);
                active.default_branch = Set(repo.default_branch);
                active.is_private = Set(repo.is_private);
                active.pushed_at = Set(repo.pushed_at.map(|t| t.fixed_offset()));
                active.updated_at = Set(now);
                active.update(&self.db).await?;
                Ok(id)
            }
            None => {
                let id = Uuid::new_v4();
                repository::ActiveModel {
                    id: Set(id),
                    github_id: Set(repo.github_id),
                    org_id: Set(repo.org_id),
                    name: Set(repo.name),
                    full_name: Set(repo.full_name),
                    default_branch: Set(repo.default_branch),
                    is_private: Set(repo.is_private),
                    pushed_at: Set(repo.pushed_at.map(|t| t.fixed_offset())),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&self.db)
                .await?;
                Ok(id)
            }
        }
    }

    async fn upsert_commit(&self, commit: CommitUpsert) -> Result<(), StoreError> {
        let existing = commit::Entity::find()
            .filter(commit::Column::RepoId.eq(commit.repo_id))
            .filter(commit::Column::Sha.eq(commit.sha.as_str()))
            .one(&self.db)
            .await?;

        match existing {
            Some(model) => {
                let mut active: commit::ActiveModel = model.into();
                active.author_login = Set(commit.author_login);
                active.committed_at = Set(commit.committed_at.fixed_offset());
                active.additions = Set(commit.additions);
                active.deletions = Set(commit.deletions);
                active.update(&self.db).await?;
            }
            None => {
                commit::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    repo_id: Set(commit.repo_id),
                    sha: Set(commit.sha),
                    author_login: Set(commit.author_login),
                    committed_at: Set(commit.committed_at.fixed_offset()),
                    additions: Set(commit.additions),
                    deletions: Set(commit.deletions),
                    created_at: Set(Utc::now().fixed_offset()),
                }
                .insert(&self.db)
                .await?;
            }
        }
        Ok(())
    }

    async fn upsert_pull_request(&self, pr: PullRequestUpsert) -> Result<(), StoreError> {
        let existing = pull_request::Entity::find()
            .filter(pull_request::Column::RepoId.eq(pr.repo_id))
            .filter(pull_request::Column::Number.eq(pr.number))
            .one(&self.db)
            .await?;

        // Last write wins; the upstream row is authoritative.
        match existing {
            Some(model) => {
                let mut active: pull_request::ActiveModel = model.into();
                active.state = Set(pr.state);
                active.title = Set(pr.title);
                active.author_login = Set(pr.author_login);
                active.created_at = Set(pr.created_at.fixed_offset());
                active.updated_at = Set(pr.updated_at.map(|t| t.fixed_offset()));
                active.closed_at = Set(pr.closed_at.map(|t| t.fixed_offset()));
                active.merged_at = Set(pr.merged_at.map(|t| t.fixed_offset()));
                active.update(&self.db).await?;
            }
            None => {
                pull_request::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    repo_id: Set(pr.repo_id),
                    number: Set(pr.number),
                    state: Set(pr.state),
                    title: Set(pr.title),
                    author_login: Set(pr.author_login),
                    created_at: Set(pr.created_at.fixed_offset()),
                    updated_at: Set(pr.updated_at.map(|t| t.fixed_offset())),
                    closed_at: Set(pr.closed_at.map(|t| t.fixed_offset())),
                    merged_at: Set(pr.merged_at.map(|t| t.fixed_offset())),
                }
                .insert(&self.db)
                .await?;
            }
        }
        Ok(())
    }

    async fn upsert_contributor_stats(
        &self,
        row: ContributorStatsUpsert,
    ) -> Result<(), StoreError> {
        let now = Utc::now().fixed_offset();
        let existing = contributor_stat::Entity::find()
            .filter(contributor_stat::Column::RepoId.eq(row.repo_id))
            .filter(contributor_stat::Column::Login.eq(row.login.as_str()))
            .filter(contributor_stat::Column::WeekBucket.eq(row.week_bucket.fixed_offset()))
            .one(&self.db)
            .await?;

        match existing {
            Some(model) => {
                let mut active: contributor_stat::ActiveModel = model.into();
                active.commit_count = Set(row.commit_count);
                active.additions = Set(row.additions);
                active.deletions = Set(row.deletions);
                active.updated_at = Set(now);
                active.update(&self.db).await?;
            }
            None => {
                contributor_stat::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    repo_id: Set(row.repo_id),
                    login: Set(row.login),
                    week_bucket: Set(row.week_bucket.fixed_offset()),
                    commit_count: Set(row.commit_count),
                    additions: Set(row.additions),
                    deletions: Set(row.deletions),
                    updated_at: Set(now),
                }
                .insert(&self.db)
                .await?;
            }
        }
        Ok(())
    }

    async fn upsert_daily_stats(&self, row: DailyStatsUpsert) -> Result<(), StoreError> {
        let now = Utc::now().fixed_offset();
        let existing = daily_stat::Entity::find()
            .filter(daily_stat::Column::OrgId.eq(row.org_id))
            .filter(daily_stat::Column::Date.eq(row.date))
            .one(&self.db)
            .await?;

        match existing {
            Some(model) => {
                let mut active: daily_stat::ActiveModel = model.into();
                active.commit_count = Set(row.commit_count);
                active.pr_opened_count = Set(row.pr_opened_count);
                active.pr_merged_count = Set(row.pr_merged_count);
                active.updated_at = Set(now);
                active.update(&self.db).await?;
            }
            None => {
                daily_stat::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    org_id: Set(row.org_id),
                    date: Set(row.date),
                    commit_count: Set(row.commit_count),
                    pr_opened_count: Set(row.pr_opened_count),
                    pr_merged_count: Set(row.pr_merged_count),
                    updated_at: Set(now),
                }
                .insert(&self.db)
                .await?;
            }
        }
        Ok(())
    }

    async fn collect_daily_stats(
        &self,
        org_id: Uuid,
        date: NaiveDate,
    ) -> Result<DailyStatsUpsert, StoreError> {
        // Range filters instead of a DATE() call keep this portable across
        // postgres and sqlite.
        let day_start = date
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
            .and_utc()
            .fixed_offset();
        let day_end = day_start + chrono::Duration::days(1);

        let repo_ids: Vec<Uuid> = repository::Entity::find()
            .filter(repository::Column::OrgId.eq(org_id))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();

        if repo_ids.is_empty() {
            return Ok(DailyStatsUpsert {
                org_id,
                date,
                commit_count: 0,
                pr_opened_count: 0,
                pr_merged_count: 0,
            });
        }

        let commit_count = commit::Entity::find()
            .filter(commit::Column::RepoId.is_in(repo_ids.clone()))
            .filter(commit::Column::CommittedAt.gte(day_start))
            .filter(commit::Column::CommittedAt.lt(day_end))
            .count(&self.db)
            .await?;

        let pr_opened_count = pull_request::Entity::find()
            .filter(pull_request::Column::RepoId.is_in(repo_ids.clone()))
            .filter(pull_request::Column::CreatedAt.gte(day_start))
            .filter(pull_request::Column::CreatedAt.lt(day_end))
            .count(&self.db)
            .await?;

        let pr_merged_count = pull_request::Entity::find()
            .filter(pull_request::Column::RepoId.is_in(repo_ids))
            .filter(pull_request::Column::MergedAt.gte(day_start))
            .filter(pull_request::Column::MergedAt.lt(day_end))
            .count(&self.db)
            .await?;

        Ok(DailyStatsUpsert {
            org_id,
            date,
            commit_count: commit_count.min(i32::MAX as u64) as i32,
            pr_opened_count: pr_opened_count.min(i32::MAX as u64) as i32,
            pr_merged_count: pr_merged_count.min(i32::MAX as u64) as i32,
        })
    }

    async fn create_sync_log(
        &self,
        sync_type: SyncType,
        started_at: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        sync_log::ActiveModel {
            id: Set(id),
            sync_type: Set(sync_type.as_str().to_string()),
            status: Set(SyncStatus::Running.as_str().to_string()),
            started_at: Set(started_at.fixed_offset()),
            finished_at: Set(None),
            items_processed: Set(0),
            error_summary: Set(None),
            since_cursor: Set(None),
        }
        .insert(&self.db)
        .await?;
        Ok(id)
    }

    async fn finalize_sync_log(&self, update: SyncLogUpdate) -> Result<(), StoreError> {
        let model = sync_log::Entity::find_by_id(update.id)
            .one(&self.db)
            .await?
            .ok_or_else(|| StoreError::Other(format!("sync log {} not found", update.id)))?;

        let error_summary = if update.error_summary.is_empty() {
            None
        } else {
            Some(serde_json::json!(update.error_summary))
        };

        let mut active: sync_log::ActiveModel = model.into();
        active.status = Set(update.status.as_str().to_string());
        active.finished_at = Set(Some(update.finished_at.fixed_offset()));
        active.items_processed = Set(update.items_processed);
        active.error_summary = Set(error_summary);
        active.since_cursor = Set(update.since_cursor.map(|t| t.fixed_offset()));
        active.update(&self.db).await?;
        Ok(())
    }

    async fn latest_finished_sync_log(&self) -> Result<Option<SyncLogRecord>, StoreError> {
        let model = sync_log::Entity::find()
            .filter(sync_log::Column::Status.is_in([
                SyncStatus::Success.as_str(),
                SyncStatus::PartialFailure.as_str(),
            ]))
            .order_by_desc(sync_log::Column::StartedAt)
            .one(&self.db)
            .await?;
        Ok(model.map(to_record))
    }

    async fn get_sync_log(&self, id: Uuid) -> Result<Option<SyncLogRecord>, StoreError> {
        let model = sync_log::Entity::find_by_id(id).one(&self.db).await?;
        Ok(model.map(to_record))
    }

    async fn list_sync_logs(&self, limit: u64) -> Result<Vec<SyncLogRecord>, StoreError> {
        let models = sync_log::Entity::find()
            .order_by_desc(sync_log::Column::StartedAt)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(models.into_iter().map(to_record).collect())
    }
}

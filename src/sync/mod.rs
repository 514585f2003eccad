//! Sync orchestration.
//!
//! A run creates its sync log up front, resolves the organization set and
//! incremental window, fans repositories out over a bounded worker pool,
//! and finalizes the log with a terminal status. Failures are isolated at
//! the narrowest level that makes sense: a bad item is recorded and skipped,
//! a failed entity fetch marks the run partial, and only a run that could
//! not resolve any organization or repository listing at all is failed.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use metrics::{counter, histogram};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{GithubConfig, SyncConfig};
use crate::github::types::RepoRecord;
use crate::github::GithubClient;
use crate::mappers;
use crate::store::{
    OrganizationUpsert, Store, StoreError, SyncLogUpdate, SyncStatus, SyncType,
};

/// Parameters of one requested run.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub sync_type: SyncType,
    /// Restrict the run to these organizations; `None` means all configured.
    pub organizations: Option<Vec<String>>,
}

/// Terminal result of a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub sync_log_id: Uuid,
    pub status: SyncStatus,
    pub items_processed: i64,
    pub error_summary: Vec<String>,
}

/// An organization selected for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOrg {
    pub login: String,
    pub legacy: bool,
}

/// Resolve which organizations a run covers.
///
/// The configured list wins; a deployment still on the single-org setting
/// falls back to that one org, flagged as legacy. An explicit request
/// filter narrows the resolved set without being able to widen it.
pub fn resolve_organizations(
    configured: &[String],
    legacy: Option<&str>,
    requested: Option<&[String]>,
) -> Vec<ResolvedOrg> {
    let mut resolved: Vec<ResolvedOrg> = if !configured.is_empty() {
        configured
            .iter()
            .map(|login| ResolvedOrg {
                login: login.clone(),
                legacy: false,
            })
            .collect()
    } else if let Some(login) = legacy {
        vec![ResolvedOrg {
            login: login.to_string(),
            legacy: true,
        }]
    } else {
        Vec::new()
    };

    if let Some(filter) = requested {
        resolved.retain(|org| filter.iter().any(|f| f == &org.login));
    }
    resolved
}

struct RepoOutcome {
    org_id: Uuid,
    full_name: String,
    items: i64,
    errors: Vec<String>,
    /// Max entity timestamp observed, confirmed only when `errors` is empty.
    max_ts: Option<DateTime<Utc>>,
    touched_dates: BTreeSet<NaiveDate>,
    interrupted: bool,
}

impl RepoOutcome {
    fn new(org_id: Uuid, full_name: String) -> Self {
        Self {
            org_id,
            full_name,
            items: 0,
            errors: Vec::new(),
            max_ts: None,
            touched_dates: BTreeSet::new(),
            interrupted: false,
        }
    }

    fn observe(&mut self, ts: DateTime<Utc>) {
        if self.max_ts.is_none_or(|max| ts > max) {
            self.max_ts = Some(ts);
        }
    }
}

/// Drives sync runs end to end.
pub struct SyncRunner {
    store: Arc<dyn Store>,
    client: Arc<GithubClient>,
    github: GithubConfig,
    options: SyncConfig,
}

impl SyncRunner {
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<GithubClient>,
        github: GithubConfig,
        options: SyncConfig,
    ) -> Self {
        Self {
            store,
            client,
            github,
            options,
        }
    }

    /// Execute one run to its terminal state.
    ///
    /// Returns `Err` only when the sync log itself cannot be written;
    /// upstream and per-item failures land in the outcome instead.
    #[instrument(skip_all, fields(sync_type = request.sync_type.as_str()))]
    pub async fn run(
        &self,
        request: SyncRequest,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, StoreError> {
        let started_at = Utc::now();
        let sync_log_id = self
            .store
            .create_sync_log(request.sync_type, started_at)
            .await?;
        info!(%sync_log_id, "sync run started");

        let since = match request.sync_type {
            SyncType::Full => None,
            SyncType::Incremental => Some(self.resolve_since(started_at).await?),
        };

        let orgs = resolve_organizations(
            &self.github.organizations,
            self.github.legacy_organization.as_deref(),
            request.organizations.as_deref(),
        );

        if orgs.is_empty() {
            let outcome = RunOutcome {
                sync_log_id,
                status: SyncStatus::Failed,
                items_processed: 0,
                error_summary: vec!["no organizations resolved for this run".to_string()],
            };
            self.finalize(&outcome, None).await?;
            return Ok(outcome);
        }

        let mut errors: Vec<String> = Vec::new();
        let mut failed_orgs = 0usize;
        let mut outcomes: Vec<RepoOutcome> = Vec::new();

        for org in &orgs {
            if cancel.is_cancelled() {
                break;
            }
            match self.sync_organization(org, since, &cancel).await {
                Ok(mut repo_outcomes) => outcomes.append(&mut repo_outcomes),
                Err(message) => {
                    failed_orgs += 1;
                    errors.push(message);
                }
            }
        }

        let mut items_processed: i64 = 0;
        let mut max_ts: Option<DateTime<Utc>> = None;
        let mut touched: BTreeSet<(Uuid, NaiveDate)> = BTreeSet::new();
        let mut interrupted = cancel.is_cancelled();

        for outcome in outcomes {
            items_processed += outcome.items;
            interrupted |= outcome.interrupted;
            if outcome.errors.is_empty() && !outcome.interrupted {
                if let Some(ts) = outcome.max_ts {
                    if max_ts.is_none_or(|max| ts > max) {
                        max_ts = Some(ts);
                    }
                }
            } else {
                warn!(
                    repo = %outcome.full_name,
                    error_count = outcome.errors.len(),
                    "repository finished with failures"
                );
            }
            errors.extend(outcome.errors);
            for date in outcome.touched_dates {
                touched.insert((outcome.org_id, date));
            }
        }

        for (org_id, date) in touched {
            match self.store.collect_daily_stats(org_id, date).await {
                Ok(row) => {
                    if let Err(err) = self.store.upsert_daily_stats(row).await {
                        errors.push(format!("daily stats for {date}: {err}"));
                    }
                }
                Err(err) => errors.push(format!("daily stats for {date}: {err}")),
            }
        }

        if interrupted {
            errors.push("run cancelled before completion".to_string());
        }

        let status = if failed_orgs == orgs.len() {
            SyncStatus::Failed
        } else if errors.is_empty() {
            SyncStatus::Success
        } else {
            SyncStatus::PartialFailure
        };

        // The cursor only advances past timestamps every repository has
        // confirmed. A partial or cancelled run keeps the previous window
        // start so the next incremental run re-covers the gap.
        let since_cursor = match status {
            SyncStatus::Success => Some(max_ts.unwrap_or(started_at)),
            SyncStatus::PartialFailure => since,
            _ => None,
        };

        let items_processed = if status == SyncStatus::Failed {
            0
        } else {
            items_processed
        };

        let outcome = RunOutcome {
            sync_log_id,
            status,
            items_processed,
            error_summary: bounded(errors, self.options.error_summary_limit),
        };
        self.finalize(&outcome, since_cursor).await?;

        let duration = (Utc::now() - started_at).to_std().unwrap_or_default();
        counter!("orgpulse_sync_runs_total", "status" => status.as_str()).increment(1);
        histogram!("orgpulse_sync_run_duration_seconds").record(duration.as_secs_f64());
        info!(
            %sync_log_id,
            status = status.as_str(),
            items = outcome.items_processed,
            duration_secs = duration.as_secs(),
            "sync run finished"
        );
        Ok(outcome)
    }

    /// Lower bound for an incremental run: the cursor of the last finished
    /// run, or a fixed lookback window when none exists.
    async fn resolve_since(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        let fallback = now - ChronoDuration::days(self.options.lookback_days as i64);
        let since = self
            .store
            .latest_finished_sync_log()
            .await?
            .and_then(|log| log.since_cursor)
            .unwrap_or(fallback);
        Ok(since)
    }

    /// Sync every repository of one organization over the worker pool.
    ///
    /// Returns `Err` with a message when the organization itself could not
    /// be resolved or its repositories listed.
    async fn sync_organization(
        &self,
        org: &ResolvedOrg,
        since: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<RepoOutcome>, String> {
        let org_id = self
            .store
            .upsert_organization(OrganizationUpsert {
                login: org.login.clone(),
                legacy_configured: org.legacy,
            })
            .await
            .map_err(|err| format!("organization {}: {err}", org.login))?;

        let repos = self
            .client
            .list_org_repos(&org.login)
            .await
            .map_err(|err| format!("repositories for {}: {err}", org.login))?;

        info!(org = %org.login, repo_count = repos.len(), "repository listing complete");

        let semaphore = Arc::new(Semaphore::new(self.options.workers));
        let mut handles = Vec::with_capacity(repos.len());
        for repo in repos {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let store = Arc::clone(&self.store);
            let client = Arc::clone(&self.client);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let outcome = sync_repository(store, client, org_id, repo, since, cancel).await;
                drop(permit);
                outcome
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    error!(org = %org.login, error = %err, "repository worker panicked");
                    let mut failed = RepoOutcome::new(org_id, format!("{}/?", org.login));
                    failed.errors.push(format!("repository worker failed: {err}"));
                    outcomes.push(failed);
                }
            }
        }
        Ok(outcomes)
    }

    async fn finalize(
        &self,
        outcome: &RunOutcome,
        since_cursor: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.store
            .finalize_sync_log(SyncLogUpdate {
                id: outcome.sync_log_id,
                status: outcome.status,
                finished_at: Utc::now(),
                items_processed: outcome.items_processed,
                error_summary: outcome.error_summary.clone(),
                since_cursor,
            })
            .await
    }
}

/// Ingest one repository: metadata, commits, pull requests, contributor
/// stats. All writes for the repository finish before the outcome is
/// returned. Failures are recorded per item or per entity type; one broken
/// entity never blocks the others.
async fn sync_repository(
    store: Arc<dyn Store>,
    client: Arc<GithubClient>,
    org_id: Uuid,
    repo: RepoRecord,
    since: Option<DateTime<Utc>>,
    cancel: CancellationToken,
) -> RepoOutcome {
    let full_name = repo.full_name.clone();
    let mut outcome = RepoOutcome::new(org_id, full_name.clone());

    if cancel.is_cancelled() {
        outcome.interrupted = true;
        return outcome;
    }

    let repo_id = match mappers::map_repository(org_id, &repo) {
        Ok(record) => match store.upsert_repository(record).await {
            Ok(id) => {
                outcome.items += 1;
                if let Some(pushed) = repo.pushed_at {
                    outcome.observe(pushed);
                }
                id
            }
            Err(err) => {
                outcome.errors.push(format!("repository {full_name}: {err}"));
                return outcome;
            }
        },
        Err(err) => {
            outcome.errors.push(format!("repository {full_name}: {err}"));
            return outcome;
        }
    };

    sync_commits(&store, &client, repo_id, &full_name, since, &cancel, &mut outcome).await;
    if outcome.interrupted {
        return outcome;
    }

    sync_pulls(&store, &client, repo_id, &full_name, since, &cancel, &mut outcome).await;
    if outcome.interrupted {
        return outcome;
    }

    sync_contributor_stats(&store, &client, repo_id, &full_name, &cancel, &mut outcome).await;

    outcome
}

async fn sync_commits(
    store: &Arc<dyn Store>,
    client: &Arc<GithubClient>,
    repo_id: Uuid,
    full_name: &str,
    since: Option<DateTime<Utc>>,
    cancel: &CancellationToken,
    outcome: &mut RepoOutcome,
) {
    // Cancellation aborts the listing mid-pagination; already-fetched
    // items from earlier entity types keep their upserts.
    let fetched = tokio::select! {
        _ = cancel.cancelled() => {
            outcome.interrupted = true;
            return;
        }
        fetched = client.list_commits(full_name, since) => fetched,
    };
    let commits = match fetched {
        Ok(commits) => commits,
        Err(err) => {
            outcome.errors.push(format!("commits {full_name}: {err}"));
            return;
        }
    };

    for raw in commits {
        let sha = raw.sha.clone();
        match mappers::map_commit(repo_id, &raw) {
            Ok(record) => {
                let committed_at = record.committed_at;
                match store.upsert_commit(record).await {
                    Ok(()) => {
                        outcome.items += 1;
                        outcome.observe(committed_at);
                        outcome.touched_dates.insert(committed_at.date_naive());
                    }
                    Err(err) => outcome
                        .errors
                        .push(format!("commit {sha} in {full_name}: {err}")),
                }
            }
            Err(err) => outcome
                .errors
                .push(format!("commit {sha} in {full_name}: {err}")),
        }
    }
}

async fn sync_pulls(
    store: &Arc<dyn Store>,
    client: &Arc<GithubClient>,
    repo_id: Uuid,
    full_name: &str,
    since: Option<DateTime<Utc>>,
    cancel: &CancellationToken,
    outcome: &mut RepoOutcome,
) {
    let fetched = tokio::select! {
        _ = cancel.cancelled() => {
            outcome.interrupted = true;
            return;
        }
        fetched = client.list_pulls(full_name, since) => fetched,
    };
    let pulls = match fetched {
        Ok(pulls) => pulls,
        Err(err) => {
            outcome.errors.push(format!("pull requests {full_name}: {err}"));
            return;
        }
    };

    for raw in pulls {
        let number = raw.number;
        match mappers::map_pull_request(repo_id, &raw) {
            Ok(record) => {
                let created_at = record.created_at;
                let merged_at = record.merged_at;
                let updated_at = record.updated_at;
                match store.upsert_pull_request(record).await {
                    Ok(()) => {
                        outcome.items += 1;
                        outcome.observe(updated_at.unwrap_or(created_at));
                        outcome.touched_dates.insert(created_at.date_naive());
                        if let Some(merged) = merged_at {
                            outcome.touched_dates.insert(merged.date_naive());
                        }
                    }
                    Err(err) => outcome
                        .errors
                        .push(format!("pull request #{number} in {full_name}: {err}")),
                }
            }
            Err(err) => outcome
                .errors
                .push(format!("pull request #{number} in {full_name}: {err}")),
        }
    }
}

async fn sync_contributor_stats(
    store: &Arc<dyn Store>,
    client: &Arc<GithubClient>,
    repo_id: Uuid,
    full_name: &str,
    cancel: &CancellationToken,
    outcome: &mut RepoOutcome,
) {
    let fetched = tokio::select! {
        _ = cancel.cancelled() => {
            outcome.interrupted = true;
            return;
        }
        fetched = client.contributor_stats(full_name) => fetched,
    };
    let records = match fetched {
        Ok(records) => records,
        Err(err) => {
            outcome
                .errors
                .push(format!("contributor stats {full_name}: {err}"));
            return;
        }
    };

    for raw in records {
        match mappers::map_contributor_stats(repo_id, &raw) {
            Ok(rows) => {
                for row in rows {
                    let login = row.login.clone();
                    if let Err(err) = store.upsert_contributor_stats(row).await {
                        outcome.errors.push(format!(
                            "contributor stats for {login} in {full_name}: {err}"
                        ));
                    }
                }
            }
            Err(err) => outcome
                .errors
                .push(format!("contributor stats {full_name}: {err}")),
        }
    }
}

fn bounded(mut errors: Vec<String>, limit: usize) -> Vec<String> {
    if errors.len() > limit {
        let dropped = errors.len() - limit;
        errors.truncate(limit);
        errors.push(format!("{dropped} further errors omitted"));
    }
    errors
}

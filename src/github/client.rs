//! Paginated GitHub REST client.
//!
//! Every request passes through the shared [`RateLimiter`] before it is
//! sent and reports response quota headers back to it. Pagination follows
//! `Link: rel="next"` headers; transient failures retry with capped
//! exponential backoff, throttle responses suspend until the reported
//! window reset instead of consuming retry attempts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use metrics::counter;
use rand::Rng;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::{BackoffConfig, GithubConfig};
use crate::github::rate_limit::{Budget, RateLimiter};
use crate::github::types::{
    CommitRecord, ContributorStatsRecord, PullRecord, RateLimitResponse, RepoRecord,
};

const ACCEPT_HEADER: &str = "application/vnd.github+json";
const CLIENT_USER_AGENT: &str = concat!("orgpulse/", env!("CARGO_PKG_VERSION"));
const JITTER_FACTOR: f64 = 0.25;
const PER_PAGE: u32 = 100;

/// Failure classification for API calls.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("rate limited until {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    #[error("transient upstream failure: {message}")]
    Transient { message: String },

    #[error("permanent upstream failure ({status}): {message}")]
    Permanent { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transient { .. } => true,
            FetchError::Network(err) => !err.is_builder() && !err.is_redirect(),
            _ => false,
        }
    }
}

/// GitHub REST client bound to one token and one shared rate limiter.
pub struct GithubClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
    limiter: Arc<RateLimiter>,
    backoff: BackoffConfig,
}

impl GithubClient {
    pub fn new(
        github: &GithubConfig,
        backoff: BackoffConfig,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(github.request_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            token: github.token.clone(),
            base_url: github.api_base.clone(),
            limiter,
            backoff,
        })
    }

    pub fn rate_limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Repositories of an organization, all pages.
    pub async fn list_org_repos(&self, org: &str) -> Result<Vec<RepoRecord>, FetchError> {
        let url = Url::parse(&format!(
            "{}/orgs/{}/repos?type=all&per_page={}",
            self.base_url, org, PER_PAGE
        ))?;
        self.drain_pages(url).await
    }

    /// Commits of a repository, all pages, optionally bounded below by
    /// `since`. The bound is passed to the API verbatim.
    pub async fn list_commits(
        &self,
        full_name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitRecord>, FetchError> {
        let mut url = Url::parse(&format!(
            "{}/repos/{}/commits?per_page={}",
            self.base_url, full_name, PER_PAGE
        ))?;
        if let Some(since) = since {
            url.query_pairs_mut().append_pair("since", &since.to_rfc3339());
        }
        match self.drain_pages(url).await {
            Ok(commits) => Ok(commits),
            // Empty repositories answer 409 Conflict.
            Err(FetchError::Permanent { status: 409, .. }) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    /// Pull requests of a repository in every state, newest updates first,
    /// all pages. When `since` is set, paging stops once a whole page falls
    /// below the bound and older items are filtered out.
    pub async fn list_pulls(
        &self,
        full_name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PullRecord>, FetchError> {
        let url = Url::parse(&format!(
            "{}/repos/{}/pulls?state=all&sort=updated&direction=desc&per_page={}",
            self.base_url, full_name, PER_PAGE
        ))?;

        let mut pager = Pager::new(self, url);
        let mut pulls: Vec<PullRecord> = Vec::new();
        while let Some(page) = pager.next_page::<PullRecord>().await? {
            let page_len = page.len();
            let mut kept = match since {
                Some(bound) => page
                    .into_iter()
                    .filter(|pr| pr.updated_at.unwrap_or(pr.created_at) >= bound)
                    .collect::<Vec<_>>(),
                None => page,
            };
            let exhausted = since.is_some() && kept.len() < page_len;
            pulls.append(&mut kept);
            // Results are sorted by updated_at descending, so once one item
            // falls below the bound every later page is older.
            if exhausted {
                break;
            }
        }
        Ok(pulls)
    }

    /// Weekly contributor statistics for a repository.
    ///
    /// GitHub computes these lazily and answers 202 while the computation
    /// is warming; that surfaces as a transient failure and retries.
    pub async fn contributor_stats(
        &self,
        full_name: &str,
    ) -> Result<Vec<ContributorStatsRecord>, FetchError> {
        let url = Url::parse(&format!(
            "{}/repos/{}/stats/contributors",
            self.base_url, full_name
        ))?;
        let (body, _) = self.fetch_page(url).await?;
        if body.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(body).map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// Current quota window straight from the API. Does not consume quota.
    pub async fn get_rate_limit(&self) -> Result<RateLimitResponse, FetchError> {
        let url = Url::parse(&format!("{}/rate_limit", self.base_url))?;
        let (body, _) = self.fetch_page(url).await?;
        serde_json::from_value(body).map_err(|e| FetchError::Decode(e.to_string()))
    }

    async fn drain_pages<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>, FetchError> {
        let mut pager = Pager::new(self, url);
        let mut items = Vec::new();
        while let Some(mut page) = pager.next_page::<T>().await? {
            items.append(&mut page);
        }
        Ok(items)
    }

    /// Fetch one page with budget gating, throttle suspension, and
    /// transient retries. Returns the decoded body and the next page url.
    async fn fetch_page(&self, url: Url) -> Result<(serde_json::Value, Option<Url>), FetchError> {
        let mut attempt: u32 = 0;
        let mut delay = Duration::from_millis(self.backoff.base_ms);
        loop {
            match self.execute(url.clone()).await {
                Ok(page) => return Ok(page),
                Err(FetchError::RateLimited { reset_at }) => {
                    let wait = (reset_at - Utc::now())
                        .to_std()
                        .unwrap_or(Duration::ZERO)
                        .saturating_add(Duration::from_secs(1));
                    counter!("orgpulse_github_rate_limit_waits_total").increment(1);
                    warn!(
                        url = %url,
                        wait_secs = wait.as_secs(),
                        "rate limited, suspending until window reset"
                    );
                    tokio::time::sleep(wait).await;
                    // Throttling is not a failure; the attempt budget only
                    // covers transient errors.
                }
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    if attempt >= self.backoff.max_attempts {
                        return Err(err);
                    }
                    let sleep = jittered(delay);
                    counter!("orgpulse_github_retries_total").increment(1);
                    warn!(
                        url = %url,
                        attempt,
                        sleep_ms = sleep.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(sleep).await;
                    delay = (delay * 2).min(Duration::from_millis(self.backoff.max_ms));
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn execute(&self, url: Url) -> Result<(serde_json::Value, Option<Url>), FetchError> {
        loop {
            match self.limiter.check_budget() {
                Budget::Ready => break,
                Budget::Wait(wait) => {
                    counter!("orgpulse_github_budget_waits_total").increment(1);
                    debug!(wait_secs = wait.as_secs(), "budget exhausted, waiting");
                    tokio::time::sleep(wait).await;
                }
            }
        }

        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, ACCEPT_HEADER)
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        counter!("orgpulse_github_requests_total", "status" => status.as_u16().to_string())
            .increment(1);

        if let Some((limit, remaining, reset_at)) = quota_from_headers(&headers) {
            self.limiter.record(limit, remaining, reset_at);
        }

        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return Ok((serde_json::Value::Null, None));
            }
            if status == StatusCode::ACCEPTED {
                return Err(FetchError::Transient {
                    message: "statistics are being computed".to_string(),
                });
            }
            let next = parse_next_link(&headers);
            let body = response
                .json()
                .await
                .map_err(|e| FetchError::Decode(e.to_string()))?;
            return Ok((body, next));
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::TOO_MANY_REQUESTS => Err(self.throttled(&headers)),
            StatusCode::FORBIDDEN if remaining_is_zero(&headers) => Err(self.throttled(&headers)),
            s if s.is_server_error() => Err(FetchError::Transient {
                message: format!("{s}: {}", truncate(&body)),
            }),
            s => Err(FetchError::Permanent {
                status: s.as_u16(),
                message: truncate(&body),
            }),
        }
    }

    fn throttled(&self, headers: &HeaderMap) -> FetchError {
        let reset_at = retry_after(headers)
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs))
            .or_else(|| quota_from_headers(headers).map(|(_, _, reset)| reset))
            .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(60));
        self.limiter.exhaust_until(reset_at);
        FetchError::RateLimited { reset_at }
    }
}

fn jittered(base: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.0..=JITTER_FACTOR);
    base.mul_f64(1.0 + jitter)
}

fn truncate(body: &str) -> String {
    let mut s = body.chars().take(200).collect::<String>();
    if s.len() < body.len() {
        s.push('…');
    }
    s
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn remaining_is_zero(headers: &HeaderMap) -> bool {
    header_i64(headers, "x-ratelimit-remaining") == Some(0)
}

fn retry_after(headers: &HeaderMap) -> Option<i64> {
    header_i64(headers, "retry-after").filter(|secs| *secs >= 0)
}

fn quota_from_headers(headers: &HeaderMap) -> Option<(u32, u32, DateTime<Utc>)> {
    let limit = header_i64(headers, "x-ratelimit-limit")?;
    let remaining = header_i64(headers, "x-ratelimit-remaining")?;
    let reset = header_i64(headers, "x-ratelimit-reset")?;
    let reset_at = Utc.timestamp_opt(reset, 0).single()?;
    Some((limit.max(0) as u32, remaining.max(0) as u32, reset_at))
}

/// Extract the `rel="next"` target from a `Link` header.
fn parse_next_link(headers: &HeaderMap) -> Option<Url> {
    let raw = headers.get("link")?.to_str().ok()?;
    for part in raw.split(',') {
        let mut sections = part.split(';');
        let target = sections.next()?.trim();
        let is_next = sections
            .any(|param| param.trim().eq_ignore_ascii_case("rel=\"next\""));
        if is_next {
            let target = target.trim_start_matches('<').trim_end_matches('>');
            return Url::parse(target).ok();
        }
    }
    None
}

/// Lazy page cursor over a `Link`-paginated collection endpoint.
///
/// Restart by constructing a new pager from the first page url; the
/// sequence is finite because GitHub omits `rel="next"` on the last page.
pub struct Pager<'a> {
    client: &'a GithubClient,
    next: Option<Url>,
}

impl<'a> Pager<'a> {
    pub fn new(client: &'a GithubClient, first: Url) -> Self {
        Self {
            client,
            next: Some(first),
        }
    }

    /// Fetch and decode the next page, or `None` when exhausted.
    pub async fn next_page<T: DeserializeOwned>(&mut self) -> Result<Option<Vec<T>>, FetchError> {
        let Some(url) = self.next.take() else {
            return Ok(None);
        };
        let (body, next) = self.client.fetch_page(url).await?;
        self.next = next;
        if body.is_null() {
            return Ok(Some(Vec::new()));
        }
        let items = serde_json::from_value(body).map_err(|e| FetchError::Decode(e.to_string()))?;
        Ok(Some(items))
    }
}

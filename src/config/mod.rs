//! Application configuration.
//!
//! Settings are read from layered dotenv files and the process environment.
//! Files never mutate the process environment; they are parsed into an
//! overlay map so tests can load configuration from a temp directory without
//! racing each other. Later layers win: `.env` < `.env.local` < process env.
//!
//! Every variable carries the `ORGPULSE_` prefix, for example
//! `ORGPULSE_GITHUB_TOKEN` or `ORGPULSE_SYNC_WORKERS`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde_json::json;
use thiserror::Error;

use crate::telemetry::LogFormat;

const ENV_PREFIX: &str = "ORGPULSE_";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },

    #[error("invalid bind address '{0}'")]
    InvalidBindAddr(String),

    #[error("ORGPULSE_GITHUB_TOKEN is required")]
    MissingGithubToken,

    #[error("ORGPULSE_GITHUB_API_BASE is not a valid URL: {0}")]
    InvalidApiBase(String),

    #[error("no organizations configured; set ORGPULSE_GITHUB_ORGS or ORGPULSE_GITHUB_ORG")]
    MissingOrganizations,

    #[error("ORGPULSE_SYNC_WORKERS must be between 1 and 32, got {0}")]
    InvalidWorkerCount(u64),

    #[error("ORGPULSE_SYNC_LOOKBACK_DAYS must be between 1 and 365, got {0}")]
    InvalidLookbackDays(u64),

    #[error("ORGPULSE_RATE_LIMIT_RESERVE_PCT must be between 0.0 and 0.5, got {0}")]
    InvalidReservePct(f64),

    #[error("backoff base {base_ms}ms must not exceed max {max_ms}ms")]
    InvalidBackoffBounds { base_ms: u64, max_ms: u64 },

    #[error("ORGPULSE_SCHEDULER_INTERVAL_SECONDS must be at least 60, got {0}")]
    InvalidSchedulerInterval(u64),

    #[error("invalid integer for {key}: '{value}'")]
    InvalidInteger { key: String, value: String },

    #[error("invalid number for {key}: '{value}'")]
    InvalidNumber { key: String, value: String },

    #[error("invalid boolean for {key}: '{value}'")]
    InvalidBoolean { key: String, value: String },
}

/// Database connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    pub connect_retries: u32,
}

/// GitHub API access settings.
#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub token: String,
    pub api_base: String,
    /// Organizations to sync, in configured order.
    pub organizations: Vec<String>,
    /// Single-org fallback kept for deployments that predate the list form.
    pub legacy_organization: Option<String>,
    pub request_timeout_ms: u64,
}

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Concurrent repository workers per run.
    pub workers: usize,
    /// Incremental window when no prior cursor exists.
    pub lookback_days: u64,
    /// Max error messages persisted on a sync log.
    pub error_summary_limit: usize,
    /// Fraction of the rate-limit quota held back for other consumers.
    pub rate_limit_reserve_pct: f64,
}

/// Retry backoff bounds for transient API failures.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub max_attempts: u32,
}

/// Periodic incremental sync settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
}

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database: DatabaseConfig,
    pub github: GithubConfig,
    pub sync: SyncConfig,
    pub backoff: BackoffConfig,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    /// Parse the configured bind address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddr(self.bind_addr.clone()))
    }

    /// Loggable view with the token redacted.
    pub fn redacted_json(&self) -> serde_json::Value {
        json!({
            "bind_addr": self.bind_addr,
            "log_level": self.log_level,
            "database": {
                "max_connections": self.database.max_connections,
                "acquire_timeout_ms": self.database.acquire_timeout_ms,
            },
            "github": {
                "token": "***",
                "api_base": self.github.api_base,
                "organizations": self.github.organizations,
                "legacy_organization": self.github.legacy_organization,
            },
            "sync": {
                "workers": self.sync.workers,
                "lookback_days": self.sync.lookback_days,
                "error_summary_limit": self.sync.error_summary_limit,
                "rate_limit_reserve_pct": self.sync.rate_limit_reserve_pct,
            },
            "backoff": {
                "base_ms": self.backoff.base_ms,
                "max_ms": self.backoff.max_ms,
                "max_attempts": self.backoff.max_attempts,
            },
            "scheduler": {
                "enabled": self.scheduler.enabled,
                "interval_seconds": self.scheduler.interval_seconds,
            },
        })
    }
}

/// Loads configuration from dotenv layers plus the process environment.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            base_dir: PathBuf::from("."),
        }
    }

    /// Load env files from `dir` instead of the working directory.
    pub fn with_base_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let env = self.collect_env()?;
        Self::build(&env)
    }

    /// Merge `.env`, `.env.local`, and the process environment, later
    /// layers overriding earlier ones. Keys are stored prefix-stripped.
    fn collect_env(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        let mut merged = BTreeMap::new();

        for name in [".env", ".env.local"] {
            let path = self.base_dir.join(name);
            if !path.exists() {
                continue;
            }
            let iter = dotenvy::from_path_iter(&path).map_err(|source| {
                ConfigError::EnvFile {
                    path: path.clone(),
                    source,
                }
            })?;
            for item in iter {
                let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                    path: path.clone(),
                    source,
                })?;
                if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                    merged.insert(stripped.to_string(), value);
                }
            }
        }

        for (key, value) in std::env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                merged.insert(stripped.to_string(), value);
            }
        }

        Ok(merged)
    }

    fn build(env: &BTreeMap<String, String>) -> Result<AppConfig, ConfigError> {
        let token = env
            .get("GITHUB_TOKEN")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingGithubToken)?;

        let api_base = env
            .get("GITHUB_API_BASE")
            .cloned()
            .unwrap_or_else(|| "https://api.github.com".to_string());
        if url::Url::parse(&api_base).is_err() {
            return Err(ConfigError::InvalidApiBase(api_base));
        }
        let api_base = api_base.trim_end_matches('/').to_string();

        let organizations = env
            .get("GITHUB_ORGS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let legacy_organization = env
            .get("GITHUB_ORG")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if organizations.is_empty() && legacy_organization.is_none() {
            return Err(ConfigError::MissingOrganizations);
        }

        let workers = parse_u64(env, "SYNC_WORKERS", 4)?;
        if !(1..=32).contains(&workers) {
            return Err(ConfigError::InvalidWorkerCount(workers));
        }

        let lookback_days = parse_u64(env, "SYNC_LOOKBACK_DAYS", 30)?;
        if !(1..=365).contains(&lookback_days) {
            return Err(ConfigError::InvalidLookbackDays(lookback_days));
        }

        let reserve_pct = parse_f64(env, "RATE_LIMIT_RESERVE_PCT", 0.02)?;
        if !(0.0..=0.5).contains(&reserve_pct) {
            return Err(ConfigError::InvalidReservePct(reserve_pct));
        }

        let backoff = BackoffConfig {
            base_ms: parse_u64(env, "BACKOFF_BASE_MS", 500)?,
            max_ms: parse_u64(env, "BACKOFF_MAX_MS", 30_000)?,
            max_attempts: parse_u64(env, "BACKOFF_MAX_ATTEMPTS", 4)? as u32,
        };
        if backoff.base_ms > backoff.max_ms {
            return Err(ConfigError::InvalidBackoffBounds {
                base_ms: backoff.base_ms,
                max_ms: backoff.max_ms,
            });
        }

        let scheduler_enabled = parse_bool(env, "SCHEDULER_ENABLED", false)?;
        let scheduler_interval = parse_u64(env, "SCHEDULER_INTERVAL_SECONDS", 3600)?;
        if scheduler_enabled && scheduler_interval < 60 {
            return Err(ConfigError::InvalidSchedulerInterval(scheduler_interval));
        }

        Ok(AppConfig {
            bind_addr: env
                .get("BIND_ADDR")
                .cloned()
                .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            log_level: env
                .get("LOG_LEVEL")
                .cloned()
                .unwrap_or_else(|| "info".to_string()),
            log_format: LogFormat::parse(
                env.get("LOG_FORMAT").map(String::as_str).unwrap_or("pretty"),
            ),
            database: DatabaseConfig {
                url: env
                    .get("DATABASE_URL")
                    .cloned()
                    .unwrap_or_else(|| "sqlite::memory:".to_string()),
                max_connections: parse_u64(env, "DB_MAX_CONNECTIONS", 10)? as u32,
                acquire_timeout_ms: parse_u64(env, "DB_ACQUIRE_TIMEOUT_MS", 5_000)?,
                connect_retries: parse_u64(env, "DB_CONNECT_RETRIES", 5)? as u32,
            },
            github: GithubConfig {
                token,
                api_base,
                organizations,
                legacy_organization,
                request_timeout_ms: parse_u64(env, "GITHUB_REQUEST_TIMEOUT_MS", 30_000)?,
            },
            sync: SyncConfig {
                workers: workers as usize,
                lookback_days,
                error_summary_limit: parse_u64(env, "SYNC_ERROR_SUMMARY_LIMIT", 10)? as usize,
                rate_limit_reserve_pct: reserve_pct,
            },
            backoff,
            scheduler: SchedulerConfig {
                enabled: scheduler_enabled,
                interval_seconds: scheduler_interval,
            },
        })
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_u64(env: &BTreeMap<String, String>, key: &str, default: u64) -> Result<u64, ConfigError> {
    match env.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidInteger {
            key: format!("{ENV_PREFIX}{key}"),
            value: raw.clone(),
        }),
    }
}

fn parse_f64(env: &BTreeMap<String, String>, key: &str, default: f64) -> Result<f64, ConfigError> {
    match env.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
            key: format!("{ENV_PREFIX}{key}"),
            value: raw.clone(),
        }),
    }
}

fn parse_bool(
    env: &BTreeMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match env.get(key).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v == "true" || v == "1" || v == "yes" => Ok(true),
        Some(v) if v == "false" || v == "0" || v == "no" => Ok(false),
        Some(v) => Err(ConfigError::InvalidBoolean {
            key: format!("{ENV_PREFIX}{key}"),
            value: v,
        }),
    }
}

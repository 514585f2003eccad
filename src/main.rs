use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use orgpulse::config::{AppConfig, ConfigLoader};
use orgpulse::github::{GithubClient, RateLimiter};
use orgpulse::server::{run_server, AppState};
use orgpulse::store::{SeaOrmStore, Store, SyncStatus, SyncType};
use orgpulse::sync::{SyncRequest, SyncRunner};
use orgpulse::{db, telemetry};

#[derive(Parser)]
#[command(name = "orgpulse", version, about = "GitHub organization analytics sync service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (and the scheduler when enabled)
    Serve,
    /// Run one sync to completion and exit
    Sync {
        /// Kind of run to perform
        #[arg(long, value_enum, default_value_t = SyncMode::Incremental)]
        mode: SyncMode,
        /// Restrict the run to these organizations
        #[arg(long = "org")]
        orgs: Vec<String>,
    },
    /// Apply pending database migrations and exit
    Migrate,
}

#[derive(Clone, Copy, ValueEnum)]
enum SyncMode {
    Full,
    Incremental,
}

impl From<SyncMode> for SyncType {
    fn from(mode: SyncMode) -> Self {
        match mode {
            SyncMode::Full => SyncType::Full,
            SyncMode::Incremental => SyncType::Incremental,
        }
    }
}

fn build_components(
    config: &AppConfig,
) -> anyhow::Result<(Arc<RateLimiter>, Arc<GithubClient>)> {
    let limiter = Arc::new(RateLimiter::new(config.sync.rate_limit_reserve_pct));
    let client = Arc::new(GithubClient::new(
        &config.github,
        config.backoff.clone(),
        Arc::clone(&limiter),
    )?);
    Ok((limiter, client))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::new().load()?;
    telemetry::init_tracing(&config.log_level, config.log_format);
    info!(config = %config.redacted_json(), "configuration loaded");

    match cli.command {
        Command::Migrate => {
            let conn = db::init_pool(&config.database).await?;
            db::run_migrations(&conn).await?;
        }
        Command::Sync { mode, orgs } => {
            let conn = db::init_pool(&config.database).await?;
            db::run_migrations(&conn).await?;
            let store: Arc<dyn Store> = Arc::new(SeaOrmStore::new(conn));
            let (_, client) = build_components(&config)?;
            let runner = SyncRunner::new(
                store,
                client,
                config.github.clone(),
                config.sync.clone(),
            );

            let cancel = CancellationToken::new();
            let ctrl_c_cancel = cancel.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                ctrl_c_cancel.cancel();
            });

            let request = SyncRequest {
                sync_type: mode.into(),
                organizations: (!orgs.is_empty()).then_some(orgs),
            };
            let outcome = runner.run(request, cancel).await?;
            println!(
                "{} {} items={}",
                outcome.sync_log_id,
                outcome.status.as_str(),
                outcome.items_processed
            );
            for line in &outcome.error_summary {
                eprintln!("  {line}");
            }
            if outcome.status == SyncStatus::Failed {
                std::process::exit(1);
            }
        }
        Command::Serve => {
            let conn = db::init_pool(&config.database).await?;
            db::run_migrations(&conn).await?;
            let store: Arc<dyn Store> = Arc::new(SeaOrmStore::new(conn.clone()));
            let (limiter, client) = build_components(&config)?;
            let runner = Arc::new(SyncRunner::new(
                Arc::clone(&store),
                client,
                config.github.clone(),
                config.sync.clone(),
            ));
            let state = Arc::new(AppState {
                db: conn,
                store,
                runner,
                limiter,
                run_guard: Mutex::new(()),
            });
            run_server(config, state).await?;
        }
    }
    Ok(())
}

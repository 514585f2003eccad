//! Database connection management.

use std::time::Duration;

use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use tracing::{info, warn};

use crate::config::DatabaseConfig;

/// Connect to the database described by `cfg`, retrying briefly so the
/// service survives a database that comes up a moment later.
pub async fn init_pool(cfg: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(cfg.url.clone());
    options
        .max_connections(cfg.max_connections)
        .acquire_timeout(Duration::from_millis(cfg.acquire_timeout_ms))
        .sqlx_logging(false);

    let mut attempt: u32 = 0;
    loop {
        match Database::connect(options.clone()).await {
            Ok(conn) => {
                info!(max_connections = cfg.max_connections, "database pool ready");
                return Ok(conn);
            }
            Err(err) if attempt < cfg.connect_retries => {
                attempt += 1;
                let backoff = Duration::from_millis(250 * u64::from(attempt));
                warn!(
                    attempt,
                    error = %err,
                    backoff_ms = backoff.as_millis() as u64,
                    "database connect failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Apply all pending migrations.
pub async fn run_migrations(conn: &DatabaseConnection) -> Result<(), DbErr> {
    Migrator::up(conn, None).await?;
    info!("migrations applied");
    Ok(())
}

/// Cheap liveness probe used by the health endpoint.
pub async fn health_check(conn: &DatabaseConnection) -> Result<(), DbErr> {
    conn.ping().await
}

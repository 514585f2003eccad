//! Periodic incremental sync scheduler.
//!
//! Runs inside the server process. Each tick awaits the triggered run
//! before sleeping again, so ticks never overlap and a slow run simply
//! delays the next one.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::store::SyncType;
use crate::sync::{SyncRequest, SyncRunner};

pub struct SyncScheduler {
    runner: Arc<SyncRunner>,
    interval: Duration,
}

impl SyncScheduler {
    pub fn new(runner: Arc<SyncRunner>, interval_seconds: u64) -> Self {
        Self {
            runner,
            interval: Duration::from_secs(interval_seconds),
        }
    }

    /// Tick until `shutdown` is cancelled. The in-flight run observes the
    /// same token and winds down with a partial_failure log.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("scheduler stopping");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }

            let request = SyncRequest {
                sync_type: SyncType::Incremental,
                organizations: None,
            };
            match self.runner.run(request, shutdown.child_token()).await {
                Ok(outcome) => info!(
                    sync_log_id = %outcome.sync_log_id,
                    status = outcome.status.as_str(),
                    items = outcome.items_processed,
                    "scheduled sync finished"
                ),
                Err(err) => {
                    error!(error = %err, "scheduled sync could not record its log");
                    warn!("scheduler will retry on the next tick");
                }
            }
        }
    }
}

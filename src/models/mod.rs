//! # Data Models
//!
//! SeaORM entity models for the orgpulse analytics schema.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod commit;
pub mod contributor_stat;
pub mod daily_stat;
pub mod organization;
pub mod pull_request;
pub mod repository;
pub mod sync_log;

pub use commit::Entity as Commit;
pub use contributor_stat::Entity as ContributorStat;
pub use daily_stat::Entity as DailyStat;
pub use organization::Entity as Organization;
pub use pull_request::Entity as PullRequest;
pub use repository::Entity as Repository;
pub use sync_log::Entity as SyncLog;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl ServiceInfo {
    pub fn current() -> Self {
        Self {
            service: "orgpulse".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self::current()
    }
}

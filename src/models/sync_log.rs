//! SyncLog entity model
//!
//! One row per sync run, created at start (status running) and finalized at
//! the end with the terminal status and counters. The since_cursor of the
//! most recent successful or partial run bounds the next incremental run.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_logs")]
pub struct Model {
    /// Unique identifier (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Type of run (full, incremental)
    pub sync_type: String,

    /// Current status (running, success, partial_failure, failed)
    pub status: String,

    pub started_at: DateTimeWithTimeZone,

    pub finished_at: Option<DateTimeWithTimeZone>,

    /// Repository, commit, and pull-request upserts performed by the run
    pub items_processed: i64,

    /// Bounded list of the first per-item error messages
    #[sea_orm(column_type = "JsonBinary")]
    pub error_summary: Option<JsonValue>,

    /// Max entity timestamp confirmed by the run; lower bound for the next
    /// incremental window
    pub since_cursor: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

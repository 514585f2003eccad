//! Commit entity model
//!
//! Immutable once ingested; keyed by (repo_id, sha) so overlapping windows
//! re-upsert the same row.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "commits")]
pub struct Model {
    /// Unique identifier (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning repository
    pub repo_id: Uuid,

    /// Commit SHA, unique per repository
    pub sha: String,

    /// Author login when the provider can attribute the commit
    pub author_login: Option<String>,

    pub committed_at: DateTimeWithTimeZone,

    pub additions: i32,

    pub deletions: i32,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::repository::Entity",
        from = "Column::RepoId",
        to = "super::repository::Column::Id"
    )]
    Repository,
}

impl Related<super::repository::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Repository.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

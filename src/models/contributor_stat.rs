//! ContributorStat entity model
//!
//! Per-contributor weekly aggregates for one repository. Replaced on
//! conflict per (repo_id, login, week_bucket), never summed.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "contributor_stats")]
pub struct Model {
    /// Unique identifier (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning repository
    pub repo_id: Uuid,

    /// Contributor login
    pub login: String,

    /// Start of the week this row aggregates
    pub week_bucket: DateTimeWithTimeZone,

    pub commit_count: i32,

    pub additions: i32,

    pub deletions: i32,

    pub updated_at: DateTimeWithTimeZone,
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

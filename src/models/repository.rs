//! Repository entity model
//!
//! A repository belongs to an organization and owns commits, pull requests,
//! and contributor statistics. Upserted by the stable GitHub id.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "repositories")]
pub struct Model {
    /// Unique identifier (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Stable provider-side repository id, unique
    pub github_id: i64,

    /// Owning organization
    pub org_id: Uuid,

    /// Short repository name (e.g. "widgets")
    pub name: String,

    /// Full name including owner (e.g. "acme/widgets")
    pub full_name: String,

    pub default_branch: String,

    pub is_private: bool,

    /// Last push reported by the provider
    pub pushed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::organization::Entity",
        from = "Column::OrgId",
        to = "super::organization::Column::Id"
    )]
    Organization,
    #[sea_orm(has_many = "super::commit::Entity")]
    Commit,
    #[sea_orm(has_many = "super::pull_request::Entity")]
    PullRequest,
    #[sea_orm(has_many = "super::contributor_stat::Entity")]
    ContributorStat,
}

impl Related<super::organization::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Organization.def()
    }
}

impl Related<super::commit::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Commit.def()
    }
}

impl Related<super::pull_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PullRequest.def()
    }
}

impl Related<super::contributor_stat::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ContributorStat.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

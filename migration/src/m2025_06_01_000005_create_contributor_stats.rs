//! Migration to create the contributor_stats table.
//!
//! One row per contributor per week bucket per repository. Conflicting rows
//! are replaced, not summed, so a re-sync of the same window is idempotent.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ContributorStats::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ContributorStats::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ContributorStats::RepoId).uuid().not_null())
                    .col(ColumnDef::new(ContributorStats::Login).text().not_null())
                    .col(
                        ColumnDef::new(ContributorStats::WeekBucket)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ContributorStats::CommitCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ContributorStats::Additions)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ContributorStats::Deletions)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ContributorStats::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_contributor_stats_repo_id")
                            .from(ContributorStats::Table, ContributorStats::RepoId)
                            .to(Repositories::Table, Repositories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_contributor_stats_repo_login_bucket")
                    .table(ContributorStats::Table)
                    .col(ContributorStats::RepoId)
                    .col(ContributorStats::Login)
                    .col(ContributorStats::WeekBucket)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_contributor_stats_repo_login_bucket")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ContributorStats::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ContributorStats {
    Table,
    Id,
    RepoId,
    Login,
    WeekBucket,
    CommitCount,
    Additions,
    Deletions,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Repositories {
    Table,
    Id,
}

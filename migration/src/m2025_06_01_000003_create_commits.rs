//! Migration to create the commits table.
//!
//! Commits are keyed by (repo_id, sha); rows are immutable once ingested but
//! writes go through an upsert so re-syncing an overlapping window is a no-op.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Commits::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Commits::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Commits::RepoId).uuid().not_null())
                    .col(ColumnDef::new(Commits::Sha).text().not_null())
                    .col(ColumnDef::new(Commits::AuthorLogin).text().null())
                    .col(
                        ColumnDef::new(Commits::CommittedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Commits::Additions)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Commits::Deletions)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Commits::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_commits_repo_id")
                            .from(Commits::Table, Commits::RepoId)
                            .to(Repositories::Table, Repositories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_commits_repo_sha")
                    .table(Commits::Table)
                    .col(Commits::RepoId)
                    .col(Commits::Sha)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_commits_repo_committed_at")
                    .table(Commits::Table)
                    .col(Commits::RepoId)
                    .col(Commits::CommittedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_commits_repo_sha").to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_commits_repo_committed_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Commits::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Commits {
    Table,
    Id,
    RepoId,
    Sha,
    AuthorLogin,
    CommittedAt,
    Additions,
    Deletions,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Repositories {
    Table,
    Id,
}

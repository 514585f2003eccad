//! Migration to create the pull_requests table.
//!
//! Pull requests mutate over time (open -> closed/merged), so re-ingestion
//! overwrites the row keyed by (repo_id, number) rather than appending.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PullRequests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PullRequests::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PullRequests::RepoId).uuid().not_null())
                    .col(
                        ColumnDef::new(PullRequests::Number)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PullRequests::State)
                            .text()
                            .not_null()
                            .default("open"),
                    )
                    .col(ColumnDef::new(PullRequests::Title).text().not_null())
                    .col(ColumnDef::new(PullRequests::AuthorLogin).text().null())
                    .col(
                        ColumnDef::new(PullRequests::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PullRequests::UpdatedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PullRequests::ClosedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PullRequests::MergedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pull_requests_repo_id")
                            .from(PullRequests::Table, PullRequests::RepoId)
                            .to(Repositories::Table, Repositories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pull_requests_repo_number")
                    .table(PullRequests::Table)
                    .col(PullRequests::RepoId)
                    .col(PullRequests::Number)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pull_requests_repo_state")
                    .table(PullRequests::Table)
                    .col(PullRequests::RepoId)
                    .col(PullRequests::State)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_pull_requests_repo_number")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_pull_requests_repo_state").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(PullRequests::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PullRequests {
    Table,
    Id,
    RepoId,
    Number,
    State,
    Title,
    AuthorLogin,
    CreatedAt,
    UpdatedAt,
    ClosedAt,
    MergedAt,
}

#[derive(DeriveIden)]
enum Repositories {
    Table,
    Id,
}

//! Migration to create the repositories table.
//!
//! Repositories belong to an organization and are upserted by their stable
//! provider-side id so re-ingestion never duplicates rows.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Repositories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Repositories::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Repositories::GithubId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Repositories::OrgId).uuid().not_null())
                    .col(ColumnDef::new(Repositories::Name).text().not_null())
                    .col(ColumnDef::new(Repositories::FullName).text().not_null())
                    .col(
                        ColumnDef::new(Repositories::DefaultBranch)
                            .text()
                            .not_null()
                            .default("main"),
                    )
                    .col(
                        ColumnDef::new(Repositories::IsPrivate)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Repositories::PushedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Repositories::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Repositories::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_repositories_org_id")
                            .from(Repositories::Table, Repositories::OrgId)
                            .to(Organizations::Table, Organizations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_repositories_github_id")
                    .table(Repositories::Table)
                    .col(Repositories::GithubId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_repositories_org_id")
                    .table(Repositories::Table)
                    .col(Repositories::OrgId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_repositories_github_id").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_repositories_org_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Repositories::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Repositories {
    Table,
    Id,
    GithubId,
    OrgId,
    Name,
    FullName,
    DefaultBranch,
    IsPrivate,
    PushedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Organizations {
    Table,
    Id,
}

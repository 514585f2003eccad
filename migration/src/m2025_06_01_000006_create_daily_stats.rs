//! Migration to create the daily_stats table.
//!
//! Derived per-organization daily aggregates, recomputed for every date a
//! sync run touches and replaced on conflict to keep re-syncs drift-free.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(DailyStats::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DailyStats::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DailyStats::OrgId).uuid().not_null())
                    .col(ColumnDef::new(DailyStats::Date).date().not_null())
                    .col(
                        ColumnDef::new(DailyStats::CommitCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DailyStats::PrOpenedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DailyStats::PrMergedCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(DailyStats::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_daily_stats_org_id")
                            .from(DailyStats::Table, DailyStats::OrgId)
                            .to(Organizations::Table, Organizations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_daily_stats_org_date")
                    .table(DailyStats::Table)
                    .col(DailyStats::OrgId)
                    .col(DailyStats::Date)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_daily_stats_org_date").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(DailyStats::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum DailyStats {
    Table,
    Id,
    OrgId,
    Date,
    CommitCount,
    PrOpenedCount,
    PrMergedCount,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Organizations {
    Table,
    Id,
}

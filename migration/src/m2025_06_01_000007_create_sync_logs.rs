//! Migration to create the sync_logs table.
//!
//! One row per sync run: created with status running, finalized with the
//! terminal status, item count, bounded error summary, and the cursor the
//! next incremental run resumes from.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncLogs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncLogs::SyncType).text().not_null())
                    .col(
                        ColumnDef::new(SyncLogs::Status)
                            .text()
                            .not_null()
                            .default("running"),
                    )
                    .col(
                        ColumnDef::new(SyncLogs::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncLogs::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncLogs::ItemsProcessed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncLogs::ErrorSummary).json_binary().null())
                    .col(
                        ColumnDef::new(SyncLogs::SinceCursor)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Index for resolving the most recent finished run per sync type
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_logs_type_status_started")
                    .table(SyncLogs::Table)
                    .col(SyncLogs::SyncType)
                    .col(SyncLogs::Status)
                    .col(SyncLogs::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_logs_type_status_started")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(SyncLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncLogs {
    Table,
    Id,
    SyncType,
    Status,
    StartedAt,
    FinishedAt,
    ItemsProcessed,
    ErrorSummary,
    SinceCursor,
}

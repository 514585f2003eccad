//! Database migrations for the orgpulse sync engine.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_06_01_000001_create_organizations;
mod m2025_06_01_000002_create_repositories;
mod m2025_06_01_000003_create_commits;
mod m2025_06_01_000004_create_pull_requests;
mod m2025_06_01_000005_create_contributor_stats;
mod m2025_06_01_000006_create_daily_stats;
mod m2025_06_01_000007_create_sync_logs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_01_000001_create_organizations::Migration),
            Box::new(m2025_06_01_000002_create_repositories::Migration),
            Box::new(m2025_06_01_000003_create_commits::Migration),
            Box::new(m2025_06_01_000004_create_pull_requests::Migration),
            Box::new(m2025_06_01_000005_create_contributor_stats::Migration),
            Box::new(m2025_06_01_000006_create_daily_stats::Migration),
            Box::new(m2025_06_01_000007_create_sync_logs::Migration),
        ]
    }
}

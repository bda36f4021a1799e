//! Database migrations for the mail sync service.

pub use sea_orm_migration::prelude::*;

mod m2025_01_10_000001_create_users;
mod m2025_01_10_000002_create_linked_accounts;
mod m2025_01_10_000003_create_threads;
mod m2025_01_10_000004_create_emails;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_10_000001_create_users::Migration),
            Box::new(m2025_01_10_000002_create_linked_accounts::Migration),
            Box::new(m2025_01_10_000003_create_threads::Migration),
            Box::new(m2025_01_10_000004_create_emails::Migration),
        ]
    }
}

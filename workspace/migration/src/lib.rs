pub use sea_orm_migration::prelude::*;

mod m20240101_000001_create_auth_tables;
mod m20240101_000002_seed_default_permissions;

pub use m20240101_000002_seed_default_permissions::DEFAULT_PERMISSIONS;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_auth_tables::Migration),
            Box::new(m20240101_000002_seed_default_permissions::Migration),
        ]
    }
}

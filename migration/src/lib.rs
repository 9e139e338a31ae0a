pub use sea_orm_migration::prelude::*;

mod iden;
mod m20240101_000001_create_core_tables;
mod m20240101_000002_user_tables;
mod m20240312_000003_activity_features;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_core_tables::Migration),
            Box::new(m20240101_000002_user_tables::Migration),
            Box::new(m20240312_000003_activity_features::Migration),
        ]
    }
}

pub use sea_orm_migration::prelude::*;

mod m20261001_000001_create_assignments;
mod m20261001_000002_create_swap_records;
mod m20261001_000003_create_outbox_messages;
mod m20261001_000004_create_outbox_archive;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_assignments::Migration),
            Box::new(m20261001_000002_create_swap_records::Migration),
            Box::new(m20261001_000003_create_outbox_messages::Migration),
            Box::new(m20261001_000004_create_outbox_archive::Migration),
        ]
    }
}

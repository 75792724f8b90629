use sea_orm_migration::prelude::*;

use rotation_coordinator_migration::Migrator;

#[tokio::main]
async fn main() {
    cli::run_cli(Migrator).await;
}

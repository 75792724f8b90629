use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Assignments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Assignments::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Assignments::PersonId).uuid().not_null())
                    .col(ColumnDef::new(Assignments::WeekStart).date().not_null())
                    .col(ColumnDef::new(Assignments::Rotation).string().not_null())
                    .col(ColumnDef::new(Assignments::Notes).string())
                    .col(
                        ColumnDef::new(Assignments::Version)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(Assignments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Assignments::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Swap lookups go by (person, week).
        manager
            .create_index(
                Index::create()
                    .table(Assignments::Table)
                    .col(Assignments::PersonId)
                    .col(Assignments::WeekStart)
                    .name("idx_assignments_person_week")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Assignments::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Assignments {
    Table,
    Id,
    PersonId,
    WeekStart,
    Rotation,
    Notes,
    Version,
    CreatedAt,
    UpdatedAt,
}

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OutboxArchive::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OutboxArchive::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OutboxArchive::EventType).string().not_null())
                    .col(
                        ColumnDef::new(OutboxArchive::AggregateType)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OutboxArchive::AggregateId).string().not_null())
                    .col(
                        ColumnDef::new(OutboxArchive::Sequence)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OutboxArchive::Payload)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OutboxArchive::Headers)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OutboxArchive::Status)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OutboxArchive::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(OutboxArchive::MaxRetries).integer().not_null())
                    .col(
                        ColumnDef::new(OutboxArchive::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OutboxArchive::PublishedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(OutboxArchive::ArchivedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(OutboxArchive::Table)
                    .col(OutboxArchive::ArchivedAt)
                    .name("idx_outbox_archive_archived_at")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OutboxArchive::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum OutboxArchive {
    Table,
    Id,
    EventType,
    AggregateType,
    AggregateId,
    Sequence,
    Payload,
    Headers,
    Status,
    RetryCount,
    MaxRetries,
    CreatedAt,
    PublishedAt,
    ArchivedAt,
}

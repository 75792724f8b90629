use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OutboxMessages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OutboxMessages::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OutboxMessages::EventType).string().not_null())
                    .col(
                        ColumnDef::new(OutboxMessages::AggregateType)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OutboxMessages::AggregateId).string().not_null())
                    .col(
                        ColumnDef::new(OutboxMessages::Sequence)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OutboxMessages::Payload)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OutboxMessages::Headers)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OutboxMessages::Status)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OutboxMessages::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(OutboxMessages::MaxRetries)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OutboxMessages::LastError).string())
                    .col(
                        ColumnDef::new(OutboxMessages::NextAttemptAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OutboxMessages::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OutboxMessages::ProcessingStartedAt)
                            .timestamp_with_time_zone(),
                    )
                    .col(ColumnDef::new(OutboxMessages::PublishedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(OutboxMessages::FailedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // Per-aggregate ordering; a collision means two writers raced on the same aggregate.
        manager
            .create_index(
                Index::create()
                    .table(OutboxMessages::Table)
                    .col(OutboxMessages::AggregateType)
                    .col(OutboxMessages::AggregateId)
                    .col(OutboxMessages::Sequence)
                    .unique()
                    .name("uq_outbox_messages_aggregate_sequence")
                    .to_owned(),
            )
            .await?;

        // Relay claim and monitor queries filter by status first.
        manager
            .create_index(
                Index::create()
                    .table(OutboxMessages::Table)
                    .col(OutboxMessages::Status)
                    .col(OutboxMessages::NextAttemptAt)
                    .name("idx_outbox_messages_status_next_attempt")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OutboxMessages::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum OutboxMessages {
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
    LastError,
    NextAttemptAt,
    CreatedAt,
    ProcessingStartedAt,
    PublishedAt,
    FailedAt,
}

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SwapRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SwapRecords::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SwapRecords::OperationId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SwapRecords::SwapType).string().not_null())
                    .col(ColumnDef::new(SwapRecords::Status).string().not_null())
                    .col(ColumnDef::new(SwapRecords::SourcePersonId).uuid().not_null())
                    .col(ColumnDef::new(SwapRecords::SourceWeek).date().not_null())
                    .col(ColumnDef::new(SwapRecords::TargetPersonId).uuid().not_null())
                    .col(ColumnDef::new(SwapRecords::TargetWeek).date())
                    .col(
                        ColumnDef::new(SwapRecords::SourceAssignmentId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SwapRecords::TargetAssignmentId).uuid())
                    .col(ColumnDef::new(SwapRecords::RequestedBy).uuid().not_null())
                    .col(ColumnDef::new(SwapRecords::Reason).string())
                    .col(
                        ColumnDef::new(SwapRecords::ExecutedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SwapRecords::RolledBackAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(SwapRecords::RolledBackBy).uuid())
                    .col(ColumnDef::new(SwapRecords::RollbackReason).string())
                    .to_owned(),
            )
            .await?;

        // Not unique: the same logical swap may be executed again after a rollback.
        manager
            .create_index(
                Index::create()
                    .table(SwapRecords::Table)
                    .col(SwapRecords::OperationId)
                    .name("idx_swap_records_operation_id")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SwapRecords::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum SwapRecords {
    Table,
    Id,
    OperationId,
    SwapType,
    Status,
    SourcePersonId,
    SourceWeek,
    TargetPersonId,
    TargetWeek,
    SourceAssignmentId,
    TargetAssignmentId,
    RequestedBy,
    Reason,
    ExecutedAt,
    RolledBackAt,
    RolledBackBy,
    RollbackReason,
}

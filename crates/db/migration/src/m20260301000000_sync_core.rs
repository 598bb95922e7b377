use sea_orm_migration::{prelude::*, sea_orm::DatabaseBackend};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .if_not_exists()
                    .table(TaskItems::Table)
                    .col(pk_id_col(manager, TaskItems::Id))
                    .col(uuid_col(TaskItems::Uuid))
                    .col(uuid_col(TaskItems::UserId))
                    .col(ColumnDef::new(TaskItems::Title).string().not_null())
                    .col(ColumnDef::new(TaskItems::Notes).text())
                    .col(ColumnDef::new(TaskItems::DueDate).date())
                    .col(position_col(manager, TaskItems::Position))
                    .col(flag_col(TaskItems::IsCompleted, false))
                    .col(ColumnDef::new(TaskItems::CompletedAt).timestamp())
                    .col(ColumnDef::new(TaskItems::ReminderAt).timestamp())
                    .col(ColumnDef::new(TaskItems::ReminderSentAt).timestamp())
                    .col(ColumnDef::new(TaskItems::ReminderAcknowledgedAt).timestamp())
                    .col(flag_col(TaskItems::IsDeleted, false))
                    .col(timestamp_col(TaskItems::CreatedAt))
                    .col(timestamp_col(TaskItems::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_task_items_uuid")
                    .table(TaskItems::Table)
                    .col(TaskItems::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_task_items_user_updated_at")
                    .table(TaskItems::Table)
                    .col(TaskItems::UserId)
                    .col(TaskItems::UpdatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_task_items_user_due_date")
                    .table(TaskItems::Table)
                    .col(TaskItems::UserId)
                    .col(TaskItems::DueDate)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_task_items_reminder_at")
                    .table(TaskItems::Table)
                    .col(TaskItems::ReminderAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .if_not_exists()
                    .table(Notes::Table)
                    .col(pk_id_col(manager, Notes::Id))
                    .col(uuid_col(Notes::Uuid))
                    .col(uuid_col(Notes::UserId))
                    .col(ColumnDef::new(Notes::Title).string().not_null())
                    .col(
                        ColumnDef::new(Notes::Content)
                            .text()
                            .not_null()
                            .default(Expr::val("")),
                    )
                    .col(flag_col(Notes::IsPinned, false))
                    .col(position_col(manager, Notes::Position))
                    .col(flag_col(Notes::IsDeleted, false))
                    .col(timestamp_col(Notes::CreatedAt))
                    .col(timestamp_col(Notes::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_notes_uuid")
                    .table(Notes::Table)
                    .col(Notes::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_notes_user_updated_at")
                    .table(Notes::Table)
                    .col(Notes::UserId)
                    .col(Notes::UpdatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .if_not_exists()
                    .table(Devices::Table)
                    .col(pk_id_col(manager, Devices::Id))
                    .col(uuid_col(Devices::Uuid))
                    .col(uuid_col(Devices::UserId))
                    .col(ColumnDef::new(Devices::Name).string().not_null())
                    .col(ColumnDef::new(Devices::Platform).string_len(32).not_null())
                    .col(ColumnDef::new(Devices::PushToken).text())
                    .col(flag_col(Devices::IsActive, true))
                    .col(flag_col(Devices::IsDeleted, false))
                    .col(ColumnDef::new(Devices::LastSyncedAt).timestamp())
                    .col(timestamp_col(Devices::CreatedAt))
                    .col(timestamp_col(Devices::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_devices_uuid")
                    .table(Devices::Table)
                    .col(Devices::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_devices_user_id")
                    .table(Devices::Table)
                    .col(Devices::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .if_not_exists()
                    .table(OutboxMessages::Table)
                    .col(pk_id_col(manager, OutboxMessages::Id))
                    .col(uuid_col(OutboxMessages::Uuid))
                    .col(uuid_col(OutboxMessages::UserId))
                    .col(
                        ColumnDef::new(OutboxMessages::AggregateType)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(uuid_col(OutboxMessages::AggregateId))
                    .col(
                        ColumnDef::new(OutboxMessages::MessageType)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(ColumnDef::new(OutboxMessages::Payload).text().not_null())
                    .col(ColumnDef::new(OutboxMessages::ProcessedAt).timestamp())
                    .col(
                        ColumnDef::new(OutboxMessages::AttemptCount)
                            .integer()
                            .not_null()
                            .default(Expr::val(0)),
                    )
                    .col(ColumnDef::new(OutboxMessages::LastError).text())
                    .col(timestamp_col(OutboxMessages::CreatedAt))
                    .col(timestamp_col(OutboxMessages::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_outbox_messages_uuid")
                    .table(OutboxMessages::Table)
                    .col(OutboxMessages::Uuid)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_outbox_messages_pending")
                    .table(OutboxMessages::Table)
                    .col(OutboxMessages::ProcessedAt)
                    .col(OutboxMessages::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OutboxMessages::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Devices::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Notes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TaskItems::Table).to_owned())
            .await?;
        Ok(())
    }
}

fn pk_id_col<T: Iden>(manager: &SchemaManager, col: T) -> ColumnDef {
    let mut col = ColumnDef::new(col);
    match manager.get_database_backend() {
        DatabaseBackend::Sqlite => {
            col.integer();
        }
        _ => {
            col.big_integer();
        }
    }
    col.not_null().auto_increment().primary_key().to_owned()
}

fn uuid_col<T: Iden>(col: T) -> ColumnDef {
    ColumnDef::new(col).uuid().not_null().to_owned()
}

fn timestamp_col<T: Iden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .timestamp()
        .not_null()
        .default(Expr::current_timestamp())
        .to_owned()
}

fn flag_col<T: Iden>(col: T, default: bool) -> ColumnDef {
    ColumnDef::new(col)
        .boolean()
        .not_null()
        .default(Expr::val(default))
        .to_owned()
}

// Positions must sort byte-wise. SQLite's default BINARY collation already
// does; Postgres needs the "C" collation spelled out.
fn position_col<T: Iden>(manager: &SchemaManager, col: T) -> ColumnDef {
    let mut col = ColumnDef::new(col);
    col.string_len(255).not_null();
    if manager.get_database_backend() == DatabaseBackend::Postgres {
        col.extra("COLLATE \"C\"");
    }
    col.to_owned()
}

#[derive(Iden)]
enum TaskItems {
    Table,
    Id,
    Uuid,
    UserId,
    Title,
    Notes,
    DueDate,
    Position,
    IsCompleted,
    CompletedAt,
    ReminderAt,
    ReminderSentAt,
    ReminderAcknowledgedAt,
    IsDeleted,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Notes {
    Table,
    Id,
    Uuid,
    UserId,
    Title,
    Content,
    IsPinned,
    Position,
    IsDeleted,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum Devices {
    Table,
    Id,
    Uuid,
    UserId,
    Name,
    Platform,
    PushToken,
    IsActive,
    IsDeleted,
    LastSyncedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
enum OutboxMessages {
    Table,
    Id,
    Uuid,
    UserId,
    AggregateType,
    AggregateId,
    MessageType,
    Payload,
    ProcessedAt,
    AttemptCount,
    LastError,
    CreatedAt,
    UpdatedAt,
}

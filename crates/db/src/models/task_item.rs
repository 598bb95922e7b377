use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionSession, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utils_core::fractional_index::{self, FractionalIndexError};
use uuid::Uuid;

use super::{
    MutationContext,
    outbox_message::{OutboxMessage, OutboxMessageError},
};
use crate::{
    entities::task_item,
    events::{AggregateKind, MessageType, OutboxEvent, ReminderSentPayload, SyncEventPayload},
};

#[derive(Debug, Error)]
pub enum TaskItemError {
    #[error("task item not found")]
    NotFound,
    #[error("task item title must not be empty")]
    EmptyTitle,
    #[error("task item is deleted")]
    Deleted,
    #[error("task item has no reminder")]
    NoReminder,
    #[error("task item reminder was already sent")]
    ReminderAlreadySent,
    #[error("task item reminder was acknowledged")]
    ReminderAcknowledged,
    #[error("task item reminder was rescheduled")]
    ReminderRescheduled,
    #[error(transparent)]
    Position(#[from] FractionalIndexError),
    #[error(transparent)]
    Outbox(#[from] OutboxMessageError),
    #[error(transparent)]
    Database(#[from] DbErr),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub notes: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub position: String,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub reminder_at: Option<DateTime<Utc>>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub reminder_acknowledged_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTaskItem {
    pub title: String,
    pub notes: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub reminder_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTaskItem {
    pub title: String,
    pub notes: Option<String>,
    pub due_date: Option<NaiveDate>,
}

fn normalized_title(title: &str) -> Result<String, TaskItemError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(TaskItemError::EmptyTitle);
    }
    Ok(title.to_string())
}

impl TaskItem {
    fn from_model(model: task_item::Model) -> Self {
        Self {
            id: model.uuid,
            user_id: model.user_id,
            title: model.title,
            notes: model.notes,
            due_date: model.due_date,
            position: model.position,
            is_completed: model.is_completed,
            completed_at: model.completed_at,
            reminder_at: model.reminder_at,
            reminder_sent_at: model.reminder_sent_at,
            reminder_acknowledged_at: model.reminder_acknowledged_at,
            is_deleted: model.is_deleted,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    /// Domain transition applied after a reminder was delivered.
    pub fn mark_reminder_sent(&mut self, now: DateTime<Utc>) -> Result<(), TaskItemError> {
        if self.is_deleted {
            return Err(TaskItemError::Deleted);
        }
        if self.reminder_at.is_none() {
            return Err(TaskItemError::NoReminder);
        }
        if self.reminder_sent_at.is_some() {
            return Err(TaskItemError::ReminderAlreadySent);
        }
        if self.reminder_acknowledged_at.is_some() {
            return Err(TaskItemError::ReminderAcknowledged);
        }
        self.reminder_sent_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    async fn find_owned_model<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<task_item::Model, TaskItemError> {
        task_item::Entity::find()
            .filter(task_item::Column::Uuid.eq(id))
            .filter(task_item::Column::UserId.eq(user_id))
            .one(db)
            .await?
            .ok_or(TaskItemError::NotFound)
    }

    async fn find_live_model<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<task_item::Model, TaskItemError> {
        let model = Self::find_owned_model(db, user_id, id).await?;
        if model.is_deleted {
            return Err(TaskItemError::Deleted);
        }
        Ok(model)
    }

    async fn enqueue_sync<C: ConnectionTrait>(
        db: &C,
        ctx: &MutationContext,
        event: OutboxEvent,
        id: Uuid,
    ) -> Result<(), TaskItemError> {
        let payload = SyncEventPayload {
            entity_id: id,
            origin_device_id: ctx.origin_device_id,
        };
        OutboxMessage::enqueue(
            db,
            ctx,
            MessageType::new(AggregateKind::TaskItem, event),
            id,
            &payload,
        )
        .await?;
        Ok(())
    }

    async fn last_position<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
    ) -> Result<Option<String>, DbErr> {
        task_item::Entity::find()
            .select_only()
            .column(task_item::Column::Position)
            .filter(task_item::Column::UserId.eq(user_id))
            .filter(task_item::Column::IsDeleted.eq(false))
            .order_by_desc(task_item::Column::Position)
            .into_tuple()
            .one(db)
            .await
    }

    pub async fn create<C: ConnectionTrait + TransactionTrait>(
        db: &C,
        ctx: &MutationContext,
        data: &CreateTaskItem,
    ) -> Result<Self, TaskItemError> {
        let title = normalized_title(&data.title)?;
        let tx = db.begin().await?;

        let position = match Self::last_position(&tx, ctx.user_id).await? {
            Some(last) => fractional_index::after(&last)?,
            None => fractional_index::first(),
        };

        let id = Uuid::new_v4();
        let active = task_item::ActiveModel {
            uuid: Set(id),
            user_id: Set(ctx.user_id),
            title: Set(title),
            notes: Set(data.notes.clone()),
            due_date: Set(data.due_date),
            position: Set(position),
            is_completed: Set(false),
            completed_at: Set(None),
            reminder_at: Set(data.reminder_at),
            reminder_sent_at: Set(None),
            reminder_acknowledged_at: Set(None),
            is_deleted: Set(false),
            created_at: Set(ctx.now),
            updated_at: Set(ctx.now),
            ..Default::default()
        };

        let model = active.insert(&tx).await?;
        Self::enqueue_sync(&tx, ctx, OutboxEvent::Created, id).await?;
        tx.commit().await?;
        Ok(Self::from_model(model))
    }

    pub async fn update<C: ConnectionTrait + TransactionTrait>(
        db: &C,
        ctx: &MutationContext,
        id: Uuid,
        data: &UpdateTaskItem,
    ) -> Result<Self, TaskItemError> {
        let title = normalized_title(&data.title)?;
        let tx = db.begin().await?;
        let record = Self::find_live_model(&tx, ctx.user_id, id).await?;

        let mut active: task_item::ActiveModel = record.into();
        active.title = Set(title);
        active.notes = Set(data.notes.clone());
        active.due_date = Set(data.due_date);
        active.updated_at = Set(ctx.now);
        let updated = active.update(&tx).await?;

        Self::enqueue_sync(&tx, ctx, OutboxEvent::Updated, id).await?;
        tx.commit().await?;
        Ok(Self::from_model(updated))
    }

    /// No message is queued when the flag does not change.
    pub async fn set_completed<C: ConnectionTrait + TransactionTrait>(
        db: &C,
        ctx: &MutationContext,
        id: Uuid,
        completed: bool,
    ) -> Result<Self, TaskItemError> {
        let tx = db.begin().await?;
        let record = Self::find_live_model(&tx, ctx.user_id, id).await?;
        if record.is_completed == completed {
            return Ok(Self::from_model(record));
        }

        let mut active: task_item::ActiveModel = record.into();
        active.is_completed = Set(completed);
        active.completed_at = Set(completed.then_some(ctx.now));
        active.updated_at = Set(ctx.now);
        let updated = active.update(&tx).await?;

        Self::enqueue_sync(&tx, ctx, OutboxEvent::CompletionChanged, id).await?;
        tx.commit().await?;
        Ok(Self::from_model(updated))
    }

    /// Places the item strictly between two neighbour positions. Either side
    /// may be absent to move to the start or end of the list.
    pub async fn move_between<C: ConnectionTrait + TransactionTrait>(
        db: &C,
        ctx: &MutationContext,
        id: Uuid,
        before: Option<&str>,
        after: Option<&str>,
    ) -> Result<Self, TaskItemError> {
        let position = fractional_index::between(before, after)?;
        let tx = db.begin().await?;
        let record = Self::find_live_model(&tx, ctx.user_id, id).await?;

        let mut active: task_item::ActiveModel = record.into();
        active.position = Set(position);
        active.updated_at = Set(ctx.now);
        let updated = active.update(&tx).await?;

        Self::enqueue_sync(&tx, ctx, OutboxEvent::Updated, id).await?;
        tx.commit().await?;
        Ok(Self::from_model(updated))
    }

    /// Replaces the reminder and re-arms it.
    pub async fn set_reminder<C: ConnectionTrait + TransactionTrait>(
        db: &C,
        ctx: &MutationContext,
        id: Uuid,
        reminder_at: Option<DateTime<Utc>>,
    ) -> Result<Self, TaskItemError> {
        let tx = db.begin().await?;
        let record = Self::find_live_model(&tx, ctx.user_id, id).await?;

        let mut active: task_item::ActiveModel = record.into();
        active.reminder_at = Set(reminder_at);
        active.reminder_sent_at = Set(None);
        active.reminder_acknowledged_at = Set(None);
        active.updated_at = Set(ctx.now);
        let updated = active.update(&tx).await?;

        Self::enqueue_sync(&tx, ctx, OutboxEvent::Updated, id).await?;
        tx.commit().await?;
        Ok(Self::from_model(updated))
    }

    pub async fn acknowledge_reminder<C: ConnectionTrait + TransactionTrait>(
        db: &C,
        ctx: &MutationContext,
        id: Uuid,
    ) -> Result<Self, TaskItemError> {
        let tx = db.begin().await?;
        let record = Self::find_live_model(&tx, ctx.user_id, id).await?;
        if record.reminder_at.is_none() {
            return Err(TaskItemError::NoReminder);
        }

        let mut active: task_item::ActiveModel = record.into();
        active.reminder_acknowledged_at = Set(Some(ctx.now));
        active.updated_at = Set(ctx.now);
        let updated = active.update(&tx).await?;

        Self::enqueue_sync(&tx, ctx, OutboxEvent::Updated, id).await?;
        tx.commit().await?;
        Ok(Self::from_model(updated))
    }

    /// Applies `mark_reminder_sent` to the stored row and queues the matching
    /// `TaskItem.ReminderSent` message in the same transaction.
    ///
    /// `delivered` is the snapshot the reminder was sent for. The row is
    /// reloaded first, so a task deleted, acknowledged or rescheduled while
    /// the push was in flight fails with the matching error and is left alone.
    pub async fn save_reminder_sent<C: ConnectionTrait + TransactionTrait>(
        db: &C,
        delivered: &TaskItem,
        now: DateTime<Utc>,
    ) -> Result<Self, TaskItemError> {
        let tx = db.begin().await?;
        let record = Self::find_live_model(&tx, delivered.user_id, delivered.id).await?;
        let mut task = Self::from_model(record.clone());
        if task.reminder_at != delivered.reminder_at {
            return Err(TaskItemError::ReminderRescheduled);
        }
        task.mark_reminder_sent(now)?;
        let Some(reminder_at) = task.reminder_at else {
            return Err(TaskItemError::NoReminder);
        };

        let mut active: task_item::ActiveModel = record.into();
        active.reminder_sent_at = Set(Some(now));
        active.updated_at = Set(now);
        active.update(&tx).await?;

        let ctx = MutationContext::new(task.user_id, now);
        OutboxMessage::enqueue(
            &tx,
            &ctx,
            MessageType::new(AggregateKind::TaskItem, OutboxEvent::ReminderSent),
            task.id,
            &ReminderSentPayload {
                task_id: task.id,
                reminder_at,
                sent_at: now,
            },
        )
        .await?;
        tx.commit().await?;
        Ok(task)
    }

    /// Deleting an already deleted item is a no-op.
    pub async fn soft_delete<C: ConnectionTrait + TransactionTrait>(
        db: &C,
        ctx: &MutationContext,
        id: Uuid,
    ) -> Result<(), TaskItemError> {
        let tx = db.begin().await?;
        let record = Self::find_owned_model(&tx, ctx.user_id, id).await?;
        if record.is_deleted {
            return Ok(());
        }

        let mut active: task_item::ActiveModel = record.into();
        active.is_deleted = Set(true);
        active.updated_at = Set(ctx.now);
        active.update(&tx).await?;

        Self::enqueue_sync(&tx, ctx, OutboxEvent::Deleted, id).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
    ) -> Result<Option<Self>, DbErr> {
        let record = task_item::Entity::find()
            .filter(task_item::Column::Uuid.eq(id))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    pub async fn find_for_day<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
        day: NaiveDate,
    ) -> Result<Vec<Self>, DbErr> {
        let models = task_item::Entity::find()
            .filter(task_item::Column::UserId.eq(user_id))
            .filter(task_item::Column::IsDeleted.eq(false))
            .filter(task_item::Column::DueDate.eq(day))
            .order_by_asc(task_item::Column::Position)
            .all(db)
            .await?;
        Ok(models.into_iter().map(Self::from_model).collect())
    }

    /// Items due within `from..=to`, by day and then list position.
    pub async fn find_for_date_range<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Self>, DbErr> {
        let models = task_item::Entity::find()
            .filter(task_item::Column::UserId.eq(user_id))
            .filter(task_item::Column::IsDeleted.eq(false))
            .filter(task_item::Column::DueDate.between(from, to))
            .order_by_asc(task_item::Column::DueDate)
            .order_by_asc(task_item::Column::Position)
            .all(db)
            .await?;
        Ok(models.into_iter().map(Self::from_model).collect())
    }

    /// With `since`, every row touched after it (soft-deleted included).
    /// Without, every live row. Oldest change first.
    pub async fn find_changed_since<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Self>, DbErr> {
        let mut query = task_item::Entity::find().filter(task_item::Column::UserId.eq(user_id));
        query = match since {
            Some(since) => query.filter(task_item::Column::UpdatedAt.gt(since)),
            None => query.filter(task_item::Column::IsDeleted.eq(false)),
        };

        let models = query
            .order_by_asc(task_item::Column::UpdatedAt)
            .order_by_asc(task_item::Column::Id)
            .all(db)
            .await?;
        Ok(models.into_iter().map(Self::from_model).collect())
    }

    /// Due, unsent, unacknowledged reminders across all users.
    pub async fn find_overdue_reminders<C: ConnectionTrait>(
        db: &C,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Self>, DbErr> {
        let models = task_item::Entity::find()
            .filter(task_item::Column::ReminderAt.is_not_null())
            .filter(task_item::Column::ReminderAt.lte(now))
            .filter(task_item::Column::ReminderSentAt.is_null())
            .filter(task_item::Column::ReminderAcknowledgedAt.is_null())
            .filter(task_item::Column::IsDeleted.eq(false))
            .order_by_asc(task_item::Column::ReminderAt)
            .limit(limit)
            .all(db)
            .await?;
        Ok(models.into_iter().map(Self::from_model).collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::test_db::setup_db;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn titled(title: &str) -> CreateTaskItem {
        CreateTaskItem {
            title: title.to_string(),
            ..Default::default()
        }
    }

    async fn message_types<C: ConnectionTrait>(db: &C, id: Uuid) -> Vec<String> {
        OutboxMessage::find_by_aggregate(db, id)
            .await
            .unwrap()
            .into_iter()
            .map(|message| message.message_type)
            .collect()
    }

    #[tokio::test]
    async fn create_appends_positions_and_enqueues_created() {
        let db = setup_db().await;
        let device_id = Uuid::new_v4();
        let ctx = MutationContext::new(Uuid::new_v4(), at(0)).from_device(device_id);

        let first = TaskItem::create(&db, &ctx, &titled("  Buy milk ")).await.unwrap();
        let second = TaskItem::create(&db, &ctx, &titled("Call home")).await.unwrap();
        assert_eq!(first.title, "Buy milk");
        assert_eq!(first.position, fractional_index::first());
        assert!(second.position > first.position);

        let messages = OutboxMessage::find_by_aggregate(&db, first.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_type, "TaskItem.Created");
        assert_eq!(messages[0].user_id, ctx.user_id);
        let payload: SyncEventPayload = serde_json::from_str(&messages[0].payload).unwrap();
        assert_eq!(payload.entity_id, first.id);
        assert_eq!(payload.origin_device_id, Some(device_id));

        let err = TaskItem::create(&db, &ctx, &titled("   ")).await.unwrap_err();
        assert!(matches!(err, TaskItemError::EmptyTitle));
    }

    #[tokio::test]
    async fn completion_changes_enqueue_only_when_flag_flips() {
        let db = setup_db().await;
        let ctx = MutationContext::new(Uuid::new_v4(), at(0));
        let task = TaskItem::create(&db, &ctx, &titled("Write report")).await.unwrap();

        let later = MutationContext::new(ctx.user_id, at(5));
        let done = TaskItem::set_completed(&db, &later, task.id, true).await.unwrap();
        assert!(done.is_completed);
        assert_eq!(done.completed_at, Some(at(5)));

        TaskItem::set_completed(&db, &later, task.id, true).await.unwrap();
        let reopened = TaskItem::set_completed(&db, &later, task.id, false).await.unwrap();
        assert_eq!(reopened.completed_at, None);

        assert_eq!(
            message_types(&db, task.id).await,
            vec![
                "TaskItem.Created",
                "TaskItem.CompletionChanged",
                "TaskItem.CompletionChanged"
            ]
        );
    }

    #[tokio::test]
    async fn mutations_are_scoped_to_the_owner() {
        let db = setup_db().await;
        let ctx = MutationContext::new(Uuid::new_v4(), at(0));
        let task = TaskItem::create(&db, &ctx, &titled("Private")).await.unwrap();

        let stranger = MutationContext::new(Uuid::new_v4(), at(1));
        let err = TaskItem::soft_delete(&db, &stranger, task.id).await.unwrap_err();
        assert!(matches!(err, TaskItemError::NotFound));
        assert_eq!(message_types(&db, task.id).await, vec!["TaskItem.Created"]);
    }

    #[tokio::test]
    async fn move_between_places_item_between_neighbours() {
        let db = setup_db().await;
        let ctx = MutationContext::new(Uuid::new_v4(), at(0));
        let a = TaskItem::create(&db, &ctx, &titled("a")).await.unwrap();
        let b = TaskItem::create(&db, &ctx, &titled("b")).await.unwrap();
        let c = TaskItem::create(&db, &ctx, &titled("c")).await.unwrap();

        let moved = TaskItem::move_between(&db, &ctx, c.id, Some(&a.position), Some(&b.position))
            .await
            .unwrap();
        assert!(a.position < moved.position && moved.position < b.position);

        let err = TaskItem::move_between(&db, &ctx, c.id, Some(&b.position), Some(&a.position))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TaskItemError::Position(FractionalIndexError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn soft_delete_keeps_the_row_and_blocks_updates() {
        let db = setup_db().await;
        let ctx = MutationContext::new(Uuid::new_v4(), at(0));
        let task = TaskItem::create(&db, &ctx, &titled("Temp")).await.unwrap();

        let later = MutationContext::new(ctx.user_id, at(3));
        TaskItem::soft_delete(&db, &later, task.id).await.unwrap();
        TaskItem::soft_delete(&db, &later, task.id).await.unwrap();

        let stored = TaskItem::find_by_id(&db, task.id).await.unwrap().unwrap();
        assert!(stored.is_deleted);
        assert_eq!(stored.updated_at, at(3));

        let err = TaskItem::update(
            &db,
            &later,
            task.id,
            &UpdateTaskItem {
                title: "Again".to_string(),
                notes: None,
                due_date: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TaskItemError::Deleted));
        assert_eq!(
            message_types(&db, task.id).await,
            vec!["TaskItem.Created", "TaskItem.Deleted"]
        );
    }

    #[tokio::test]
    async fn day_and_range_queries_follow_due_date_and_position() {
        let db = setup_db().await;
        let ctx = MutationContext::new(Uuid::new_v4(), at(0));
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let next_day = day.succ_opt().unwrap();

        let due = |title: &str, due_date| CreateTaskItem {
            title: title.to_string(),
            due_date: Some(due_date),
            ..Default::default()
        };
        let first = TaskItem::create(&db, &ctx, &due("first", day)).await.unwrap();
        let second = TaskItem::create(&db, &ctx, &due("second", day)).await.unwrap();
        let tomorrow = TaskItem::create(&db, &ctx, &due("tomorrow", next_day)).await.unwrap();
        TaskItem::create(&db, &ctx, &titled("someday")).await.unwrap();
        TaskItem::move_between(&db, &ctx, second.id, None, Some(&first.position))
            .await
            .unwrap();

        let titles = |items: Vec<TaskItem>| items.into_iter().map(|t| t.title).collect::<Vec<_>>();
        assert_eq!(
            titles(TaskItem::find_for_day(&db, ctx.user_id, day).await.unwrap()),
            vec!["second", "first"]
        );
        assert_eq!(
            titles(
                TaskItem::find_for_date_range(&db, ctx.user_id, day, next_day)
                    .await
                    .unwrap()
            ),
            vec!["second", "first", "tomorrow"]
        );

        TaskItem::soft_delete(&db, &ctx, tomorrow.id).await.unwrap();
        assert!(
            TaskItem::find_for_day(&db, ctx.user_id, next_day)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn changed_since_includes_deleted_rows_only_with_cursor() {
        let db = setup_db().await;
        let user_id = Uuid::new_v4();
        let old = TaskItem::create(&db, &MutationContext::new(user_id, at(0)), &titled("old"))
            .await
            .unwrap();
        let gone = TaskItem::create(&db, &MutationContext::new(user_id, at(1)), &titled("gone"))
            .await
            .unwrap();
        TaskItem::soft_delete(&db, &MutationContext::new(user_id, at(10)), gone.id)
            .await
            .unwrap();
        TaskItem::create(&db, &MutationContext::new(Uuid::new_v4(), at(10)), &titled("other"))
            .await
            .unwrap();

        let all = TaskItem::find_changed_since(&db, user_id, None).await.unwrap();
        assert_eq!(all.iter().map(|t| t.id).collect::<Vec<_>>(), vec![old.id]);

        let changed = TaskItem::find_changed_since(&db, user_id, Some(at(5))).await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, gone.id);
        assert!(changed[0].is_deleted);
    }

    #[tokio::test]
    async fn reminder_lifecycle() {
        let db = setup_db().await;
        let ctx = MutationContext::new(Uuid::new_v4(), at(0));
        let task = TaskItem::create(&db, &ctx, &titled("Stretch")).await.unwrap();
        let mut no_reminder = task.clone();
        assert!(matches!(
            no_reminder.mark_reminder_sent(at(1)),
            Err(TaskItemError::NoReminder)
        ));

        TaskItem::set_reminder(&db, &ctx, task.id, Some(at(30))).await.unwrap();
        assert!(TaskItem::find_overdue_reminders(&db, at(29), 10).await.unwrap().is_empty());

        let mut due = TaskItem::find_overdue_reminders(&db, at(30), 10).await.unwrap();
        assert_eq!(due.len(), 1);
        let delivered = due.remove(0);
        let reminded = TaskItem::save_reminder_sent(&db, &delivered, at(31)).await.unwrap();
        assert_eq!(reminded.reminder_sent_at, Some(at(31)));
        assert!(matches!(
            TaskItem::save_reminder_sent(&db, &delivered, at(32)).await,
            Err(TaskItemError::ReminderAlreadySent)
        ));

        assert!(TaskItem::find_overdue_reminders(&db, at(60), 10).await.unwrap().is_empty());
        let stored = TaskItem::find_by_id(&db, task.id).await.unwrap().unwrap();
        assert_eq!(stored.reminder_sent_at, Some(at(31)));

        let messages = OutboxMessage::find_by_aggregate(&db, task.id).await.unwrap();
        let sent = messages.last().unwrap();
        assert_eq!(sent.message_type, "TaskItem.ReminderSent");
        let payload: ReminderSentPayload = serde_json::from_str(&sent.payload).unwrap();
        assert_eq!(payload.reminder_at, at(30));

        TaskItem::set_reminder(&db, &ctx, task.id, Some(at(90))).await.unwrap();
        TaskItem::acknowledge_reminder(&db, &ctx, task.id).await.unwrap();
        assert!(TaskItem::find_overdue_reminders(&db, at(120), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleted_task_cannot_be_marked_sent() {
        let mut task = TaskItem {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "x".to_string(),
            notes: None,
            due_date: None,
            position: fractional_index::first(),
            is_completed: false,
            completed_at: None,
            reminder_at: Some(at(0)),
            reminder_sent_at: None,
            reminder_acknowledged_at: None,
            is_deleted: true,
            created_at: at(0),
            updated_at: at(0),
        };
        assert!(matches!(
            task.mark_reminder_sent(at(1)),
            Err(TaskItemError::Deleted)
        ));
        assert_eq!(task.reminder_sent_at, None);
    }

    #[tokio::test]
    async fn reminder_changes_during_delivery_are_not_stamped() {
        let db = setup_db().await;
        let ctx = MutationContext::new(Uuid::new_v4(), at(0));
        let deleted = TaskItem::create(&db, &ctx, &titled("Deleted")).await.unwrap();
        let acked = TaskItem::create(&db, &ctx, &titled("Acked")).await.unwrap();
        let moved = TaskItem::create(&db, &ctx, &titled("Moved")).await.unwrap();
        for id in [deleted.id, acked.id, moved.id] {
            TaskItem::set_reminder(&db, &ctx, id, Some(at(10))).await.unwrap();
        }
        let snapshots = TaskItem::find_overdue_reminders(&db, at(10), 10).await.unwrap();
        assert_eq!(snapshots.len(), 3);
        let snapshot = |id: Uuid| snapshots.iter().find(|task| task.id == id).unwrap().clone();

        TaskItem::soft_delete(&db, &ctx, deleted.id).await.unwrap();
        TaskItem::acknowledge_reminder(&db, &ctx, acked.id).await.unwrap();
        TaskItem::set_reminder(&db, &ctx, moved.id, Some(at(90))).await.unwrap();

        assert!(matches!(
            TaskItem::save_reminder_sent(&db, &snapshot(deleted.id), at(11)).await,
            Err(TaskItemError::Deleted)
        ));
        assert!(matches!(
            TaskItem::save_reminder_sent(&db, &snapshot(acked.id), at(11)).await,
            Err(TaskItemError::ReminderAcknowledged)
        ));
        assert!(matches!(
            TaskItem::save_reminder_sent(&db, &snapshot(moved.id), at(11)).await,
            Err(TaskItemError::ReminderRescheduled)
        ));

        for id in [deleted.id, acked.id, moved.id] {
            let stored = TaskItem::find_by_id(&db, id).await.unwrap().unwrap();
            assert_eq!(stored.reminder_sent_at, None);
            assert!(
                !message_types(&db, id)
                    .await
                    .contains(&"TaskItem.ReminderSent".to_string())
            );
        }
    }
}

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::MutationContext;
use crate::{
    entities::outbox_message,
    events::{MessageType, UnknownMessageType},
};

#[derive(Debug, Error)]
pub enum OutboxMessageError {
    #[error("outbox payload must not be empty")]
    EmptyPayload,
    #[error("outbox aggregate id must not be nil")]
    NilAggregateId,
    #[error("outbox message {0} was already processed")]
    AlreadyProcessed(Uuid),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] DbErr),
}

/// A durably queued domain event. Pending while `processed_at` is unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    #[serde(skip)]
    pub row_id: i64,
    pub id: Uuid,
    pub user_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub message_type: String,
    pub payload: String,
    pub processed_at: Option<DateTime<Utc>>,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxMessage {
    fn from_model(model: outbox_message::Model) -> Self {
        Self {
            row_id: model.id,
            id: model.uuid,
            user_id: model.user_id,
            aggregate_type: model.aggregate_type,
            aggregate_id: model.aggregate_id,
            message_type: model.message_type,
            payload: model.payload,
            processed_at: model.processed_at,
            attempt_count: model.attempt_count,
            last_error: model.last_error,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }

    pub fn parsed_type(&self) -> Result<MessageType, UnknownMessageType> {
        self.message_type.parse()
    }

    pub async fn create<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
        message_type: MessageType,
        aggregate_id: Uuid,
        payload: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, OutboxMessageError> {
        let payload = payload.into();
        let trimmed = payload.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Err(OutboxMessageError::EmptyPayload);
        }
        if aggregate_id.is_nil() {
            return Err(OutboxMessageError::NilAggregateId);
        }

        let active = outbox_message::ActiveModel {
            uuid: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            aggregate_type: Set(message_type.aggregate.to_string()),
            aggregate_id: Set(aggregate_id),
            message_type: Set(message_type.to_string()),
            payload: Set(payload),
            processed_at: Set(None),
            attempt_count: Set(0),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let model = active.insert(db).await?;
        Ok(Self::from_model(model))
    }

    /// Serializes `payload` and queues it for the owner of `ctx`. Callers run
    /// this on the same connection or transaction as the mutation itself.
    pub async fn enqueue<C: ConnectionTrait, P: Serialize>(
        db: &C,
        ctx: &MutationContext,
        message_type: MessageType,
        aggregate_id: Uuid,
        payload: &P,
    ) -> Result<Self, OutboxMessageError> {
        let payload = serde_json::to_string(payload)?;
        Self::create(db, ctx.user_id, message_type, aggregate_id, payload, ctx.now).await
    }

    pub fn mark_processed(&mut self, now: DateTime<Utc>) -> Result<(), OutboxMessageError> {
        if self.processed_at.is_some() {
            return Err(OutboxMessageError::AlreadyProcessed(self.id));
        }
        self.processed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn increment_attempt(&mut self, now: DateTime<Utc>, error: impl Into<String>) {
        self.attempt_count += 1;
        self.last_error = Some(error.into());
        self.updated_at = now;
    }

    /// Persists the lifecycle fields. A stored `processed_at` is never cleared
    /// and the stored attempt count never goes down.
    pub async fn save<C: ConnectionTrait>(&self, db: &C) -> Result<(), OutboxMessageError> {
        let record = outbox_message::Entity::find_by_id(self.row_id)
            .one(db)
            .await?
            .ok_or(DbErr::RecordNotFound(
                "Outbox message not found".to_string(),
            ))?;

        let processed_at = record.processed_at.or(self.processed_at);
        let attempt_count = record.attempt_count.max(self.attempt_count);
        let mut active: outbox_message::ActiveModel = record.into();
        active.processed_at = Set(processed_at);
        active.attempt_count = Set(attempt_count);
        active.last_error = Set(self.last_error.clone());
        active.updated_at = Set(self.updated_at);
        active.update(db).await?;
        Ok(())
    }

    pub async fn fetch_pending_batch<C: ConnectionTrait>(
        db: &C,
        max_count: u64,
    ) -> Result<Vec<Self>, DbErr> {
        let models = outbox_message::Entity::find()
            .filter(outbox_message::Column::ProcessedAt.is_null())
            .order_by_asc(outbox_message::Column::CreatedAt)
            .order_by_asc(outbox_message::Column::Id)
            .limit(max_count)
            .all(db)
            .await?;
        Ok(models.into_iter().map(Self::from_model).collect())
    }

    /// Pending messages that still have attempts left, oldest first.
    pub async fn fetch_retryable_batch<C: ConnectionTrait>(
        db: &C,
        max_count: u64,
        max_attempts: i32,
    ) -> Result<Vec<Self>, DbErr> {
        let models = outbox_message::Entity::find()
            .filter(outbox_message::Column::ProcessedAt.is_null())
            .filter(outbox_message::Column::AttemptCount.lt(max_attempts))
            .order_by_asc(outbox_message::Column::CreatedAt)
            .order_by_asc(outbox_message::Column::Id)
            .limit(max_count)
            .all(db)
            .await?;
        Ok(models.into_iter().map(Self::from_model).collect())
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
    ) -> Result<Option<Self>, DbErr> {
        let record = outbox_message::Entity::find()
            .filter(outbox_message::Column::Uuid.eq(id))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    pub async fn find_by_aggregate<C: ConnectionTrait>(
        db: &C,
        aggregate_id: Uuid,
    ) -> Result<Vec<Self>, DbErr> {
        let models = outbox_message::Entity::find()
            .filter(outbox_message::Column::AggregateId.eq(aggregate_id))
            .order_by_asc(outbox_message::Column::CreatedAt)
            .order_by_asc(outbox_message::Column::Id)
            .all(db)
            .await?;
        Ok(models.into_iter().map(Self::from_model).collect())
    }

    pub async fn delete<C: ConnectionTrait>(db: &C, id: Uuid) -> Result<u64, DbErr> {
        let result = outbox_message::Entity::delete_many()
            .filter(outbox_message::Column::Uuid.eq(id))
            .exec(db)
            .await?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::{
        events::{AggregateKind, OutboxEvent},
        test_db::setup_db,
    };

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    const NOTE_CREATED: MessageType = MessageType::new(AggregateKind::Note, OutboxEvent::Created);

    #[tokio::test]
    async fn create_derives_message_type_and_rejects_bad_input() {
        let db = setup_db().await;
        let user_id = Uuid::new_v4();
        let aggregate_id = Uuid::new_v4();

        let message = OutboxMessage::create(
            &db,
            user_id,
            MessageType::new(AggregateKind::TaskItem, OutboxEvent::Updated),
            aggregate_id,
            r#"{"entityId":"x"}"#,
            at(0),
        )
        .await
        .unwrap();
        assert_eq!(message.message_type, "TaskItem.Updated");
        assert_eq!(message.aggregate_type, "TaskItem");
        assert_eq!(message.attempt_count, 0);
        assert!(message.is_pending());

        for payload in ["", "   ", "null"] {
            let err = OutboxMessage::create(&db, user_id, NOTE_CREATED, aggregate_id, payload, at(0))
                .await
                .unwrap_err();
            assert!(matches!(err, OutboxMessageError::EmptyPayload), "{payload:?}");
        }

        let err = OutboxMessage::create(&db, user_id, NOTE_CREATED, Uuid::nil(), "{}", at(0))
            .await
            .unwrap_err();
        assert!(matches!(err, OutboxMessageError::NilAggregateId));
    }

    #[tokio::test]
    async fn pending_batch_is_fifo_and_bounded() {
        let db = setup_db().await;
        let user_id = Uuid::new_v4();
        let newest = Uuid::new_v4();
        let oldest = Uuid::new_v4();
        let middle = Uuid::new_v4();

        OutboxMessage::create(&db, user_id, NOTE_CREATED, newest, "{}", at(3))
            .await
            .unwrap();
        OutboxMessage::create(&db, user_id, NOTE_CREATED, oldest, "{}", at(1))
            .await
            .unwrap();
        OutboxMessage::create(&db, user_id, NOTE_CREATED, middle, "{}", at(2))
            .await
            .unwrap();

        let batch = OutboxMessage::fetch_pending_batch(&db, 2).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|message| message.aggregate_id).collect();
        assert_eq!(ids, vec![oldest, middle]);

        let mut first = batch[0].clone();
        first.mark_processed(at(5)).unwrap();
        first.save(&db).await.unwrap();

        let batch = OutboxMessage::fetch_pending_batch(&db, 10).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|message| message.aggregate_id).collect();
        assert_eq!(ids, vec![middle, newest]);
    }

    #[tokio::test]
    async fn retryable_batch_skips_exhausted_messages() {
        let db = setup_db().await;
        let user_id = Uuid::new_v4();
        let mut exhausted = OutboxMessage::create(&db, user_id, NOTE_CREATED, Uuid::new_v4(), "{}", at(0))
            .await
            .unwrap();
        let fresh = OutboxMessage::create(&db, user_id, NOTE_CREATED, Uuid::new_v4(), "{}", at(1))
            .await
            .unwrap();

        for attempt in 0..3 {
            exhausted.increment_attempt(at(2 + attempt), format!("boom {attempt}"));
        }
        exhausted.save(&db).await.unwrap();

        let retryable = OutboxMessage::fetch_retryable_batch(&db, 10, 3).await.unwrap();
        assert_eq!(retryable.len(), 1);
        assert_eq!(retryable[0].id, fresh.id);

        let pending = OutboxMessage::fetch_pending_batch(&db, 10).await.unwrap();
        assert_eq!(pending.len(), 2);

        let stored = OutboxMessage::find_by_id(&db, exhausted.id).await.unwrap().unwrap();
        assert_eq!(stored.attempt_count, 3);
        assert_eq!(stored.last_error.as_deref(), Some("boom 2"));
        assert!(stored.is_pending());
    }

    #[tokio::test]
    async fn processed_at_is_set_once_and_never_cleared() {
        let db = setup_db().await;
        let mut message =
            OutboxMessage::create(&db, Uuid::new_v4(), NOTE_CREATED, Uuid::new_v4(), "{}", at(0))
                .await
                .unwrap();
        let stale = message.clone();

        message.mark_processed(at(1)).unwrap();
        assert!(matches!(
            message.mark_processed(at(2)),
            Err(OutboxMessageError::AlreadyProcessed(id)) if id == message.id
        ));
        message.save(&db).await.unwrap();

        stale.save(&db).await.unwrap();
        let stored = OutboxMessage::find_by_id(&db, message.id).await.unwrap().unwrap();
        assert_eq!(stored.processed_at, Some(at(1)));
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let db = setup_db().await;
        let message =
            OutboxMessage::create(&db, Uuid::new_v4(), NOTE_CREATED, Uuid::new_v4(), "{}", at(0))
                .await
                .unwrap();

        assert_eq!(OutboxMessage::delete(&db, message.id).await.unwrap(), 1);
        assert!(OutboxMessage::find_by_id(&db, message.id).await.unwrap().is_none());
    }
}

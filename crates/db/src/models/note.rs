use chrono::{DateTime, Utc};
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
    entities::note,
    events::{AggregateKind, MessageType, OutboxEvent, SyncEventPayload},
};

#[derive(Debug, Error)]
pub enum NoteError {
    #[error("note not found")]
    NotFound,
    #[error("note title must not be empty")]
    EmptyTitle,
    #[error("note is deleted")]
    Deleted,
    #[error(transparent)]
    Position(#[from] FractionalIndexError),
    #[error(transparent)]
    Outbox(#[from] OutboxMessageError),
    #[error(transparent)]
    Database(#[from] DbErr),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub content: String,
    pub is_pinned: bool,
    pub position: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateNote {
    pub title: String,
    pub content: String,
    pub is_pinned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateNote {
    pub title: String,
    pub content: String,
    pub is_pinned: bool,
}

impl Note {
    fn from_model(model: note::Model) -> Self {
        Self {
            id: model.uuid,
            user_id: model.user_id,
            title: model.title,
            content: model.content,
            is_pinned: model.is_pinned,
            position: model.position,
            is_deleted: model.is_deleted,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    fn normalized_title(title: &str) -> Result<String, NoteError> {
        match title.trim() {
            "" => Err(NoteError::EmptyTitle),
            title => Ok(title.to_string()),
        }
    }

    async fn find_live_model<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<note::Model, NoteError> {
        let model = note::Entity::find()
            .filter(note::Column::Uuid.eq(id))
            .filter(note::Column::UserId.eq(user_id))
            .one(db)
            .await?
            .ok_or(NoteError::NotFound)?;
        if model.is_deleted {
            return Err(NoteError::Deleted);
        }
        Ok(model)
    }

    async fn enqueue_sync<C: ConnectionTrait>(
        db: &C,
        ctx: &MutationContext,
        event: OutboxEvent,
        id: Uuid,
    ) -> Result<(), NoteError> {
        let payload = SyncEventPayload {
            entity_id: id,
            origin_device_id: ctx.origin_device_id,
        };
        OutboxMessage::enqueue(
            db,
            ctx,
            MessageType::new(AggregateKind::Note, event),
            id,
            &payload,
        )
        .await?;
        Ok(())
    }

    pub async fn create<C: ConnectionTrait + TransactionTrait>(
        db: &C,
        ctx: &MutationContext,
        data: &CreateNote,
    ) -> Result<Self, NoteError> {
        let title = Self::normalized_title(&data.title)?;
        let tx = db.begin().await?;

        let last: Option<String> = note::Entity::find()
            .select_only()
            .column(note::Column::Position)
            .filter(note::Column::UserId.eq(ctx.user_id))
            .filter(note::Column::IsDeleted.eq(false))
            .order_by_desc(note::Column::Position)
            .into_tuple()
            .one(&tx)
            .await?;
        let position = match last {
            Some(last) => fractional_index::after(&last)?,
            None => fractional_index::first(),
        };

        let id = Uuid::new_v4();
        let active = note::ActiveModel {
            uuid: Set(id),
            user_id: Set(ctx.user_id),
            title: Set(title),
            content: Set(data.content.clone()),
            is_pinned: Set(data.is_pinned),
            position: Set(position),
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
        data: &UpdateNote,
    ) -> Result<Self, NoteError> {
        let title = Self::normalized_title(&data.title)?;
        let tx = db.begin().await?;
        let record = Self::find_live_model(&tx, ctx.user_id, id).await?;

        let mut active: note::ActiveModel = record.into();
        active.title = Set(title);
        active.content = Set(data.content.clone());
        active.is_pinned = Set(data.is_pinned);
        active.updated_at = Set(ctx.now);
        let updated = active.update(&tx).await?;

        Self::enqueue_sync(&tx, ctx, OutboxEvent::Updated, id).await?;
        tx.commit().await?;
        Ok(Self::from_model(updated))
    }

    pub async fn move_between<C: ConnectionTrait + TransactionTrait>(
        db: &C,
        ctx: &MutationContext,
        id: Uuid,
        before: Option<&str>,
        after: Option<&str>,
    ) -> Result<Self, NoteError> {
        let position = fractional_index::between(before, after)?;
        let tx = db.begin().await?;
        let record = Self::find_live_model(&tx, ctx.user_id, id).await?;

        let mut active: note::ActiveModel = record.into();
        active.position = Set(position);
        active.updated_at = Set(ctx.now);
        let updated = active.update(&tx).await?;

        Self::enqueue_sync(&tx, ctx, OutboxEvent::Updated, id).await?;
        tx.commit().await?;
        Ok(Self::from_model(updated))
    }

    pub async fn soft_delete<C: ConnectionTrait + TransactionTrait>(
        db: &C,
        ctx: &MutationContext,
        id: Uuid,
    ) -> Result<(), NoteError> {
        let tx = db.begin().await?;
        let record = match Self::find_live_model(&tx, ctx.user_id, id).await {
            Ok(record) => record,
            Err(NoteError::Deleted) => return Ok(()),
            Err(err) => return Err(err),
        };

        let mut active: note::ActiveModel = record.into();
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
        let record = note::Entity::find()
            .filter(note::Column::Uuid.eq(id))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    pub async fn find_changed_since<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Self>, DbErr> {
        let mut query = note::Entity::find().filter(note::Column::UserId.eq(user_id));
        query = match since {
            Some(since) => query.filter(note::Column::UpdatedAt.gt(since)),
            None => query.filter(note::Column::IsDeleted.eq(false)),
        };

        let models = query
            .order_by_asc(note::Column::UpdatedAt)
            .order_by_asc(note::Column::Id)
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

    fn draft(title: &str) -> CreateNote {
        CreateNote {
            title: title.to_string(),
            content: format!("{title} body"),
            is_pinned: false,
        }
    }

    #[tokio::test]
    async fn note_changes_enqueue_sync_messages() {
        let db = setup_db().await;
        let ctx = MutationContext::new(Uuid::new_v4(), at(0));
        let note = Note::create(&db, &ctx, &draft("Ideas")).await.unwrap();

        let edit = MutationContext::new(ctx.user_id, at(2));
        let updated = Note::update(
            &db,
            &edit,
            note.id,
            &UpdateNote {
                title: "Ideas v2".to_string(),
                content: "more".to_string(),
                is_pinned: true,
            },
        )
        .await
        .unwrap();
        assert!(updated.is_pinned);
        assert_eq!(updated.created_at, at(0));
        assert_eq!(updated.updated_at, at(2));

        Note::soft_delete(&db, &edit, note.id).await.unwrap();
        Note::soft_delete(&db, &edit, note.id).await.unwrap();

        let types: Vec<_> = OutboxMessage::find_by_aggregate(&db, note.id)
            .await
            .unwrap()
            .into_iter()
            .map(|message| message.message_type)
            .collect();
        assert_eq!(types, vec!["Note.Created", "Note.Updated", "Note.Deleted"]);
    }

    #[tokio::test]
    async fn failed_mutation_leaves_no_outbox_message() {
        let db = setup_db().await;
        let ctx = MutationContext::new(Uuid::new_v4(), at(0));

        let err = Note::create(&db, &ctx, &draft(" ")).await.unwrap_err();
        assert!(matches!(err, NoteError::EmptyTitle));

        let missing = Uuid::new_v4();
        let err = Note::move_between(&db, &ctx, missing, None, None).await.unwrap_err();
        assert!(matches!(err, NoteError::NotFound));
        assert!(OutboxMessage::fetch_pending_batch(&db, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn positions_keep_list_order() {
        let db = setup_db().await;
        let ctx = MutationContext::new(Uuid::new_v4(), at(0));
        let first = Note::create(&db, &ctx, &draft("first")).await.unwrap();
        let second = Note::create(&db, &ctx, &draft("second")).await.unwrap();
        let third = Note::create(&db, &ctx, &draft("third")).await.unwrap();
        assert!(first.position < second.position && second.position < third.position);

        let moved = Note::move_between(&db, &ctx, third.id, None, Some(&first.position))
            .await
            .unwrap();
        assert!(moved.position < first.position);
    }

    #[tokio::test]
    async fn changed_since_reports_touched_notes() {
        let db = setup_db().await;
        let user_id = Uuid::new_v4();
        let stale = Note::create(&db, &MutationContext::new(user_id, at(0)), &draft("stale"))
            .await
            .unwrap();
        let fresh = Note::create(&db, &MutationContext::new(user_id, at(8)), &draft("fresh"))
            .await
            .unwrap();

        let changed = Note::find_changed_since(&db, user_id, Some(at(4))).await.unwrap();
        assert_eq!(changed.iter().map(|n| n.id).collect::<Vec<_>>(), vec![fresh.id]);

        let all = Note::find_changed_since(&db, user_id, None).await.unwrap();
        assert_eq!(
            all.iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![stale.id, fresh.id]
        );
    }
}

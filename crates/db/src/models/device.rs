use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, TransactionSession, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{
    MutationContext,
    outbox_message::{OutboxMessage, OutboxMessageError},
};
use crate::{
    entities::device,
    events::{AggregateKind, DeviceEventPayload, MessageType, OutboxEvent},
    types::DevicePlatform,
};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device not found")]
    NotFound,
    #[error("device name must not be empty")]
    EmptyName,
    #[error(transparent)]
    Outbox(#[from] OutboxMessageError),
    #[error(transparent)]
    Database(#[from] DbErr),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub platform: DevicePlatform,
    pub push_token: Option<String>,
    pub is_active: bool,
    pub is_deleted: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDevice {
    pub name: String,
    pub platform: DevicePlatform,
    pub push_token: Option<String>,
}

impl Device {
    fn from_model(model: device::Model) -> Self {
        Self {
            id: model.uuid,
            user_id: model.user_id,
            name: model.name,
            platform: model.platform,
            push_token: model.push_token,
            is_active: model.is_active,
            is_deleted: model.is_deleted,
            last_synced_at: model.last_synced_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    /// Whether pushes can be delivered to this device.
    pub fn is_reachable(&self) -> bool {
        self.is_active
            && !self.is_deleted
            && self
                .push_token
                .as_deref()
                .is_some_and(|token| !token.trim().is_empty())
    }

    async fn enqueue_event<C: ConnectionTrait>(
        db: &C,
        ctx: &MutationContext,
        event: OutboxEvent,
        id: Uuid,
    ) -> Result<(), DeviceError> {
        OutboxMessage::enqueue(
            db,
            ctx,
            MessageType::new(AggregateKind::Device, event),
            id,
            &DeviceEventPayload { device_id: id },
        )
        .await?;
        Ok(())
    }

    async fn find_owned_model<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<device::Model, DeviceError> {
        device::Entity::find()
            .filter(device::Column::Uuid.eq(id))
            .filter(device::Column::UserId.eq(user_id))
            .filter(device::Column::IsDeleted.eq(false))
            .one(db)
            .await?
            .ok_or(DeviceError::NotFound)
    }

    pub async fn register<C: ConnectionTrait + TransactionTrait>(
        db: &C,
        ctx: &MutationContext,
        data: &RegisterDevice,
    ) -> Result<Self, DeviceError> {
        let name = data.name.trim();
        if name.is_empty() {
            return Err(DeviceError::EmptyName);
        }

        let tx = db.begin().await?;
        let id = Uuid::new_v4();
        let active = device::ActiveModel {
            uuid: Set(id),
            user_id: Set(ctx.user_id),
            name: Set(name.to_string()),
            platform: Set(data.platform),
            push_token: Set(data.push_token.clone()),
            is_active: Set(true),
            is_deleted: Set(false),
            last_synced_at: Set(None),
            created_at: Set(ctx.now),
            updated_at: Set(ctx.now),
            ..Default::default()
        };

        let model = active.insert(&tx).await?;
        Self::enqueue_event(&tx, ctx, OutboxEvent::Registered, id).await?;
        tx.commit().await?;
        Ok(Self::from_model(model))
    }

    pub async fn deactivate<C: ConnectionTrait + TransactionTrait>(
        db: &C,
        ctx: &MutationContext,
        id: Uuid,
    ) -> Result<Self, DeviceError> {
        let tx = db.begin().await?;
        let record = Self::find_owned_model(&tx, ctx.user_id, id).await?;
        if !record.is_active {
            return Ok(Self::from_model(record));
        }

        let mut active: device::ActiveModel = record.into();
        active.is_active = Set(false);
        active.updated_at = Set(ctx.now);
        let updated = active.update(&tx).await?;

        Self::enqueue_event(&tx, ctx, OutboxEvent::Deactivated, id).await?;
        tx.commit().await?;
        Ok(Self::from_model(updated))
    }

    pub async fn soft_delete<C: ConnectionTrait + TransactionTrait>(
        db: &C,
        ctx: &MutationContext,
        id: Uuid,
    ) -> Result<(), DeviceError> {
        let tx = db.begin().await?;
        let record = Self::find_owned_model(&tx, ctx.user_id, id).await?;

        let mut active: device::ActiveModel = record.into();
        active.is_active = Set(false);
        active.is_deleted = Set(true);
        active.updated_at = Set(ctx.now);
        active.update(&tx).await?;

        Self::enqueue_event(&tx, ctx, OutboxEvent::Deleted, id).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn find_by_id<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
    ) -> Result<Option<Self>, DbErr> {
        let record = device::Entity::find()
            .filter(device::Column::Uuid.eq(id))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    /// The device if it belongs to `user_id` and is active and not deleted.
    pub async fn find_active_for_user<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, DbErr> {
        let record = device::Entity::find()
            .filter(device::Column::Uuid.eq(id))
            .filter(device::Column::UserId.eq(user_id))
            .filter(device::Column::IsActive.eq(true))
            .filter(device::Column::IsDeleted.eq(false))
            .one(db)
            .await?;
        Ok(record.map(Self::from_model))
    }

    pub async fn find_active_by_user<C: ConnectionTrait>(
        db: &C,
        user_id: Uuid,
    ) -> Result<Vec<Self>, DbErr> {
        let models = device::Entity::find()
            .filter(device::Column::UserId.eq(user_id))
            .filter(device::Column::IsActive.eq(true))
            .filter(device::Column::IsDeleted.eq(false))
            .order_by_asc(device::Column::CreatedAt)
            .order_by_asc(device::Column::Id)
            .all(db)
            .await?;
        Ok(models.into_iter().map(Self::from_model).collect())
    }

    pub async fn touch_last_synced<C: ConnectionTrait>(
        db: &C,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), DbErr> {
        let record = device::Entity::find()
            .filter(device::Column::Uuid.eq(id))
            .one(db)
            .await?
            .ok_or(DbErr::RecordNotFound("Device not found".to_string()))?;

        let mut active: device::ActiveModel = record.into();
        active.last_synced_at = Set(Some(now));
        active.update(db).await?;
        Ok(())
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

    fn phone(token: Option<&str>) -> RegisterDevice {
        RegisterDevice {
            name: "Pixel".to_string(),
            platform: DevicePlatform::Android,
            push_token: token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn active_lookups_respect_owner_and_state() {
        let db = setup_db().await;
        let ctx = MutationContext::new(Uuid::new_v4(), at(0));
        let kept = Device::register(&db, &ctx, &phone(Some("tok-1"))).await.unwrap();
        let paused = Device::register(&db, &ctx, &phone(Some("tok-2"))).await.unwrap();
        let removed = Device::register(&db, &ctx, &phone(None)).await.unwrap();
        let foreign = Device::register(&db, &MutationContext::new(Uuid::new_v4(), at(0)), &phone(None))
            .await
            .unwrap();

        Device::deactivate(&db, &ctx, paused.id).await.unwrap();
        Device::soft_delete(&db, &ctx, removed.id).await.unwrap();

        let active = Device::find_active_by_user(&db, ctx.user_id).await.unwrap();
        assert_eq!(active.iter().map(|d| d.id).collect::<Vec<_>>(), vec![kept.id]);

        assert!(Device::find_active_for_user(&db, ctx.user_id, kept.id).await.unwrap().is_some());
        for id in [paused.id, removed.id, foreign.id] {
            assert!(Device::find_active_for_user(&db, ctx.user_id, id).await.unwrap().is_none());
        }

        let err = Device::deactivate(&db, &ctx, removed.id).await.unwrap_err();
        assert!(matches!(err, DeviceError::NotFound));

        let types: Vec<_> = OutboxMessage::find_by_aggregate(&db, removed.id)
            .await
            .unwrap()
            .into_iter()
            .map(|message| message.message_type)
            .collect();
        assert_eq!(types, vec!["Device.Registered", "Device.Deleted"]);
    }

    #[tokio::test]
    async fn touch_last_synced_records_time() {
        let db = setup_db().await;
        let ctx = MutationContext::new(Uuid::new_v4(), at(0));
        let device = Device::register(&db, &ctx, &phone(Some("tok"))).await.unwrap();
        assert!(device.is_reachable());

        Device::touch_last_synced(&db, device.id, at(7)).await.unwrap();
        let stored = Device::find_by_id(&db, device.id).await.unwrap().unwrap();
        assert_eq!(stored.last_synced_at, Some(at(7)));
        assert_eq!(stored.updated_at, at(0));

        let missing = Device::touch_last_synced(&db, Uuid::new_v4(), at(8)).await;
        assert!(matches!(missing, Err(DbErr::RecordNotFound(_))));
    }

    #[test]
    fn blank_push_token_is_unreachable() {
        let device = Device {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Tablet".to_string(),
            platform: DevicePlatform::Ios,
            push_token: Some("  ".to_string()),
            is_active: true,
            is_deleted: false,
            last_synced_at: None,
            created_at: at(0),
            updated_at: at(0),
        };
        assert!(!device.is_reachable());
    }
}

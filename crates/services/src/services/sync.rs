use std::sync::Arc;

use chrono::{DateTime, Utc};
use db::{
    DBService, DbErr,
    models::{device::Device, note::Note, task_item::TaskItem},
};
use serde::Serialize;
use thiserror::Error;
use utils_core::clock::Clock;
use uuid::Uuid;

use super::current_user::{CurrentUser, CurrentUserError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("device {0} not found")]
    DeviceNotFound(Uuid),
    #[error("max items per entity must be greater than zero")]
    InvalidLimit,
    #[error(transparent)]
    CurrentUser(#[from] CurrentUserError),
    #[error(transparent)]
    Database(#[from] DbErr),
}

/// A row that can be bucketed by a delta pull.
pub trait SyncEntity {
    fn entity_id(&self) -> Uuid;
    fn created_at(&self) -> DateTime<Utc>;
    fn updated_at(&self) -> DateTime<Utc>;
    fn is_deleted(&self) -> bool;
}

impl SyncEntity for TaskItem {
    fn entity_id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }
}

impl SyncEntity for Note {
    fn entity_id(&self) -> Uuid {
        self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.is_deleted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedEntity {
    pub id: Uuid,
    pub deleted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeBuckets<T> {
    pub created: Vec<T>,
    pub updated: Vec<T>,
    pub deleted: Vec<DeletedEntity>,
}

impl<T> Default for ChangeBuckets<T> {
    fn default() -> Self {
        Self {
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<T> ChangeBuckets<T> {
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncChanges {
    pub server_timestamp_utc: DateTime<Utc>,
    pub tasks: ChangeBuckets<TaskItem>,
    pub notes: ChangeBuckets<Note>,
    pub has_more_tasks: bool,
    pub has_more_notes: bool,
}

/// Buckets rows changed since `since`. Soft-deleted rows always land in
/// `deleted`, stamped with their last update. Without a cursor every live row
/// is `created` and deleted rows are dropped. Input order is kept per bucket.
pub fn categorize<T: SyncEntity>(rows: Vec<T>, since: Option<DateTime<Utc>>) -> ChangeBuckets<T> {
    let mut buckets = ChangeBuckets::default();
    for row in rows {
        match since {
            None if row.is_deleted() => {}
            None => buckets.created.push(row),
            Some(_) if row.is_deleted() => buckets.deleted.push(DeletedEntity {
                id: row.entity_id(),
                deleted_at: row.updated_at(),
            }),
            Some(since) if row.created_at() > since => buckets.created.push(row),
            Some(_) => buckets.updated.push(row),
        }
    }
    buckets
}

/// Caps the total across all three buckets at `max_items`, filling created,
/// then updated, then deleted. The flag reports whether anything was cut.
pub fn truncate<T>(buckets: ChangeBuckets<T>, max_items: usize) -> (ChangeBuckets<T>, bool) {
    let has_more = buckets.len() > max_items;
    if !has_more {
        return (buckets, false);
    }

    let ChangeBuckets {
        mut created,
        mut updated,
        mut deleted,
    } = buckets;

    let mut remaining = max_items;
    created.truncate(remaining);
    remaining -= created.len();
    updated.truncate(remaining);
    remaining -= updated.len();
    deleted.truncate(remaining);

    (
        ChangeBuckets {
            created,
            updated,
            deleted,
        },
        true,
    )
}

/// Delta pull for one user's tasks and notes.
#[derive(Clone)]
pub struct SyncService {
    db: DBService,
    clock: Arc<dyn Clock>,
}

impl SyncService {
    pub fn new(db: DBService, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub async fn get_changes(
        &self,
        current_user: &dyn CurrentUser,
        since: Option<DateTime<Utc>>,
        device_id: Option<Uuid>,
        max_items_per_entity: usize,
    ) -> Result<SyncChanges, SyncError> {
        if max_items_per_entity == 0 {
            return Err(SyncError::InvalidLimit);
        }

        let user_id = current_user.user_id()?;
        if let Some(device_id) = device_id
            && Device::find_active_for_user(&self.db.pool, user_id, device_id)
                .await?
                .is_none()
        {
            tracing::debug!(%user_id, %device_id, "sync rejected for unknown device");
            return Err(SyncError::DeviceNotFound(device_id));
        }

        // Read before the queries so a row committed in between sorts after
        // the returned cursor instead of below it.
        let now = self.clock.now();
        let tasks = TaskItem::find_changed_since(&self.db.pool, user_id, since).await?;
        let notes = Note::find_changed_since(&self.db.pool, user_id, since).await?;

        let (tasks, has_more_tasks) = truncate(categorize(tasks, since), max_items_per_entity);
        let (notes, has_more_notes) = truncate(categorize(notes, since), max_items_per_entity);

        if let Some(device_id) = device_id {
            Device::touch_last_synced(&self.db.pool, device_id, now).await?;
        }

        tracing::debug!(
            %user_id,
            tasks = tasks.len(),
            notes = notes.len(),
            has_more_tasks,
            has_more_notes,
            "sync changes computed"
        );

        Ok(SyncChanges {
            server_timestamp_utc: now,
            tasks,
            notes,
            has_more_tasks,
            has_more_notes,
        })
    }
}

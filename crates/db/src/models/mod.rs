use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod device;
pub mod note;
pub mod outbox_message;
pub mod task_item;

/// Who is making a change, from which device, and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationContext {
    pub user_id: Uuid,
    pub origin_device_id: Option<Uuid>,
    pub now: DateTime<Utc>,
}

impl MutationContext {
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            origin_device_id: None,
            now,
        }
    }

    pub fn from_device(mut self, device_id: Uuid) -> Self {
        self.origin_device_id = Some(device_id);
        self
    }
}

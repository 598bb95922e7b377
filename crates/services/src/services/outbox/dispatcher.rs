use std::sync::Arc;

use async_trait::async_trait;
use db::{
    events::{AggregateKind, MessageType, OutboxEvent},
    models::outbox_message::OutboxMessage,
};
use uuid::Uuid;

use super::types::DispatchError;
use crate::services::{
    current_user::{CurrentUser, OutboxContextUser},
    notification::NotificationSink,
};

#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn dispatch(&self, message: &OutboxMessage) -> Result<(), DispatchError>;
}

/// Whether other devices of the owner need to pull after this message.
pub fn is_sync_relevant(message_type: MessageType) -> bool {
    use AggregateKind::{Device, Note, TaskItem};
    use OutboxEvent::{
        CompletionChanged, Created, Deactivated, Deleted, Registered, ReminderSent, Updated,
    };

    match (message_type.aggregate, message_type.event) {
        (TaskItem | Note, Created | Updated | Deleted) => true,
        (TaskItem, CompletionChanged) => true,
        (Note, CompletionChanged) => false,
        (TaskItem | Note, ReminderSent | Registered | Deactivated) => false,
        (Device, _) => false,
    }
}

/// Reads `originDeviceId` (or `OriginDeviceId`) from a JSON payload. Anything
/// unreadable counts as no origin device.
fn origin_device_id(message: &OutboxMessage) -> Option<Uuid> {
    let payload = match serde_json::from_str::<serde_json::Value>(&message.payload) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(
                message_id = %message.id,
                error = %err,
                "outbox payload is not valid JSON; notifying all devices"
            );
            return None;
        }
    };

    let raw = payload
        .get("originDeviceId")
        .or_else(|| payload.get("OriginDeviceId"))
        .filter(|value| !value.is_null())?;

    match raw.as_str().map(Uuid::parse_str) {
        Some(Ok(device_id)) => Some(device_id),
        _ => {
            tracing::warn!(
                message_id = %message.id,
                origin = %raw,
                "outbox payload has an unreadable origin device id; notifying all devices"
            );
            None
        }
    }
}

/// Turns sync-relevant outbox messages into "sync needed" pushes.
pub struct OutboxDispatcher {
    sink: Arc<dyn NotificationSink>,
    current_user: Arc<dyn CurrentUser>,
}

impl OutboxDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink,
            current_user: Arc::new(OutboxContextUser),
        }
    }

    pub fn with_current_user(mut self, current_user: Arc<dyn CurrentUser>) -> Self {
        self.current_user = current_user;
        self
    }
}

#[async_trait]
impl MessageDispatcher for OutboxDispatcher {
    async fn dispatch(&self, message: &OutboxMessage) -> Result<(), DispatchError> {
        let message_type = match message.parsed_type() {
            Ok(message_type) => message_type,
            Err(err) => {
                tracing::warn!(message_id = %message.id, error = %err, "unknown outbox message type");
                return Ok(());
            }
        };

        if !is_sync_relevant(message_type) {
            tracing::debug!(
                message_id = %message.id,
                %message_type,
                "message type is not sync-relevant"
            );
            return Ok(());
        }

        let user_id = self.current_user.user_id()?;
        if user_id != message.user_id {
            return Err(DispatchError::OwnerMismatch {
                message_id: message.id,
                owner: message.user_id,
                current_user: user_id,
            });
        }
        let origin_device_id = origin_device_id(message);

        // Delivery problems must not turn into outbox retries.
        if let Err(err) = self.sink.send_sync_needed(user_id, origin_device_id).await {
            tracing::warn!(
                message_id = %message.id,
                %user_id,
                error = %err,
                "sync-needed notification failed"
            );
        }
        Ok(())
    }
}

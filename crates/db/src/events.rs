use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Entity kind an outbox message was produced by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
pub enum AggregateKind {
    TaskItem,
    Note,
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
pub enum OutboxEvent {
    Created,
    Updated,
    Deleted,
    CompletionChanged,
    ReminderSent,
    Registered,
    Deactivated,
}

/// Stored as `"<AggregateKind>.<OutboxEvent>"`, e.g. `"Note.Created"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageType {
    pub aggregate: AggregateKind,
    pub event: OutboxEvent,
}

impl MessageType {
    pub const fn new(aggregate: AggregateKind, event: OutboxEvent) -> Self {
        Self { aggregate, event }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.aggregate, self.event)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown message type: {0}")]
pub struct UnknownMessageType(pub String);

impl FromStr for MessageType {
    type Err = UnknownMessageType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownMessageType(value.to_string());
        let (aggregate, event) = value.split_once('.').ok_or_else(unknown)?;
        Ok(Self {
            aggregate: aggregate.parse().map_err(|_| unknown())?,
            event: event.parse().map_err(|_| unknown())?,
        })
    }
}

/// Payload of every task item and note change. `origin_device_id` names the
/// device that made the change so it can be left out of the sync push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEventPayload {
    pub entity_id: Uuid,
    #[serde(
        default,
        alias = "OriginDeviceId",
        skip_serializing_if = "Option::is_none"
    )]
    pub origin_device_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderSentPayload {
    pub task_id: Uuid,
    pub reminder_at: DateTime<Utc>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEventPayload {
    pub device_id: Uuid,
}

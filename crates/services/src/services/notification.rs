use std::time::Duration;

use async_trait::async_trait;
use db::{DBService, DbErr, models::device::Device};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("push delivery to device {device_id} failed: {reason}")]
    Delivery { device_id: Uuid, reason: String },
    #[error("all {attempted} push deliveries failed")]
    AllDeliveriesFailed { attempted: usize },
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Outbound push channel used by the outbox dispatcher and the reminder
/// monitor.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Tells every device of `user_id` except `origin_device_id` to pull.
    async fn send_sync_needed(
        &self,
        user_id: Uuid,
        origin_device_id: Option<Uuid>,
    ) -> Result<(), NotificationError>;

    async fn send_task_reminder(
        &self,
        user_id: Uuid,
        task_id: Uuid,
        title: &str,
        body: &str,
    ) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    SyncNeeded {
        user_id: Uuid,
    },
    TaskReminder {
        user_id: Uuid,
        task_id: Uuid,
        title: String,
        body: String,
    },
}

/// Delivers one message to one device.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn deliver(&self, device: &Device, message: &PushMessage)
    -> Result<(), NotificationError>;
}

/// Only logs. Used when no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPushGateway;

#[async_trait]
impl PushGateway for LogPushGateway {
    async fn deliver(
        &self,
        device: &Device,
        message: &PushMessage,
    ) -> Result<(), NotificationError> {
        tracing::info!(
            device_id = %device.id,
            platform = %device.platform,
            ?message,
            "push delivered (log gateway)"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookDelivery<'a> {
    device_id: Uuid,
    platform: String,
    push_token: &'a str,
    message: &'a PushMessage,
}

/// POSTs each delivery as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookPushGateway {
    client: reqwest::Client,
    url: String,
}

impl WebhookPushGateway {
    pub fn new(url: impl Into<String>) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PushGateway for WebhookPushGateway {
    async fn deliver(
        &self,
        device: &Device,
        message: &PushMessage,
    ) -> Result<(), NotificationError> {
        let Some(push_token) = device.push_token.as_deref() else {
            return Err(NotificationError::Delivery {
                device_id: device.id,
                reason: "device has no push token".to_string(),
            });
        };

        let delivery = WebhookDelivery {
            device_id: device.id,
            platform: device.platform.to_string(),
            push_token,
            message,
        };
        let resp = self.client.post(&self.url).json(&delivery).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NotificationError::Delivery {
                device_id: device.id,
                reason: format!("webhook responded with {status}"),
            });
        }
        Ok(())
    }
}

/// Fans pushes out to a user's reachable devices.
pub struct DevicePushNotifier<G> {
    db: DBService,
    gateway: G,
}

impl<G: PushGateway> DevicePushNotifier<G> {
    pub fn new(db: DBService, gateway: G) -> Self {
        Self { db, gateway }
    }

    async fn fan_out(
        &self,
        devices: Vec<Device>,
        message: PushMessage,
    ) -> Result<(), NotificationError> {
        if devices.is_empty() {
            tracing::debug!(?message, "no devices to notify");
            return Ok(());
        }

        let attempted = devices.len();
        let mut failed = 0;
        for device in &devices {
            if let Err(err) = self.gateway.deliver(device, &message).await {
                failed += 1;
                tracing::warn!(device_id = %device.id, error = %err, "push delivery failed");
            }
        }

        if failed == attempted {
            return Err(NotificationError::AllDeliveriesFailed { attempted });
        }
        Ok(())
    }

    async fn reachable_devices(&self, user_id: Uuid) -> Result<Vec<Device>, NotificationError> {
        let devices = Device::find_active_by_user(&self.db.pool, user_id).await?;
        Ok(devices.into_iter().filter(Device::is_reachable).collect())
    }
}

#[async_trait]
impl<G: PushGateway> NotificationSink for DevicePushNotifier<G> {
    async fn send_sync_needed(
        &self,
        user_id: Uuid,
        origin_device_id: Option<Uuid>,
    ) -> Result<(), NotificationError> {
        let devices = self
            .reachable_devices(user_id)
            .await?
            .into_iter()
            .filter(|device| Some(device.id) != origin_device_id)
            .collect();
        self.fan_out(devices, PushMessage::SyncNeeded { user_id })
            .await
    }

    async fn send_task_reminder(
        &self,
        user_id: Uuid,
        task_id: Uuid,
        title: &str,
        body: &str,
    ) -> Result<(), NotificationError> {
        let devices = self.reachable_devices(user_id).await?;
        self.fan_out(
            devices,
            PushMessage::TaskReminder {
                user_id,
                task_id,
                title: title.to_string(),
                body: body.to_string(),
            },
        )
        .await
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

fn default_max_batch_size() -> u64 {
    50
}

fn default_polling_interval_ms() -> u64 {
    1000
}

fn default_max_retry_attempts() -> i32 {
    5
}

fn default_reminder_polling_interval_secs() -> u64 {
    30
}

fn default_max_reminders_per_batch() -> u64 {
    100
}

fn default_max_items_per_entity() -> usize {
    500
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxWorkerConfig {
    #[serde(alias = "maxBatchSize")]
    pub max_batch_size: u64,
    #[serde(alias = "pollingIntervalMilliseconds", alias = "pollingIntervalMs")]
    pub polling_interval_ms: u64,
    #[serde(alias = "maxRetryAttempts")]
    pub max_retry_attempts: i32,
}

impl Default for OutboxWorkerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            polling_interval_ms: default_polling_interval_ms(),
            max_retry_attempts: default_max_retry_attempts(),
        }
    }
}

impl OutboxWorkerConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderWorkerConfig {
    #[serde(alias = "pollingIntervalSeconds", alias = "pollingIntervalSecs")]
    pub polling_interval_secs: u64,
    #[serde(alias = "maxRemindersPerBatch")]
    pub max_reminders_per_batch: u64,
}

impl Default for ReminderWorkerConfig {
    fn default() -> Self {
        Self {
            polling_interval_secs: default_reminder_polling_interval_secs(),
            max_reminders_per_batch: default_max_reminders_per_batch(),
        }
    }
}

impl ReminderWorkerConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    #[serde(alias = "webhookUrl")]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    #[serde(alias = "maxItemsPerEntity")]
    pub max_items_per_entity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_items_per_entity: default_max_items_per_entity(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    #[serde(alias = "outboxWorker")]
    pub outbox_worker: OutboxWorkerConfig,
    #[serde(alias = "reminderWorker")]
    pub reminder_worker: ReminderWorkerConfig,
    pub push: PushConfig,
    pub sync: SyncConfig,
}

impl WorkerConfig {
    pub fn from_raw(raw_config: &str) -> Self {
        match serde_json::from_str::<WorkerConfig>(raw_config) {
            Ok(config) => config.normalized(),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse worker config (line {}, column {}): {}, using default",
                    e.line(),
                    e.column(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn normalized(mut self) -> Self {
        self.push.webhook_url = self
            .push
            .webhook_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("outbox_worker.max_batch_size", self.outbox_worker.max_batch_size > 0),
            (
                "outbox_worker.polling_interval_ms",
                self.outbox_worker.polling_interval_ms > 0,
            ),
            (
                "outbox_worker.max_retry_attempts",
                self.outbox_worker.max_retry_attempts > 0,
            ),
            (
                "reminder_worker.polling_interval_secs",
                self.reminder_worker.polling_interval_secs > 0,
            ),
            (
                "reminder_worker.max_reminders_per_batch",
                self.reminder_worker.max_reminders_per_batch > 0,
            ),
            ("sync.max_items_per_entity", self.sync.max_items_per_entity > 0),
        ];

        if let Some((field, _)) = checks.iter().find(|(_, ok)| !ok) {
            return Err(ConfigError::ValidationError(format!(
                "{field} must be greater than zero"
            )));
        }

        if let Some(url) = &self.push.webhook_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ConfigError::ValidationError(format!(
                "push.webhook_url must be an http(s) URL, got '{url}'"
            )));
        }

        Ok(())
    }
}

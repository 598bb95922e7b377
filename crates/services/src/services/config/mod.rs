use std::{fmt::Display, path::Path, str::FromStr};

use thiserror::Error;

mod schema;

pub use schema::{OutboxWorkerConfig, PushConfig, ReminderWorkerConfig, SyncConfig, WorkerConfig};

pub const OUTBOX_BATCH_SIZE_ENV: &str = "TASKNOTES_OUTBOX_BATCH_SIZE";
pub const OUTBOX_POLL_INTERVAL_MS_ENV: &str = "TASKNOTES_OUTBOX_POLL_INTERVAL_MS";
pub const OUTBOX_MAX_RETRY_ATTEMPTS_ENV: &str = "TASKNOTES_OUTBOX_MAX_RETRY_ATTEMPTS";
pub const REMINDER_POLL_INTERVAL_SECS_ENV: &str = "TASKNOTES_REMINDER_POLL_INTERVAL_SECS";
pub const REMINDER_BATCH_SIZE_ENV: &str = "TASKNOTES_REMINDER_BATCH_SIZE";
pub const SYNC_MAX_ITEMS_ENV: &str = "TASKNOTES_SYNC_MAX_ITEMS";
pub const PUSH_WEBHOOK_URL_ENV: &str = "TASKNOTES_PUSH_WEBHOOK_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Will always return config, falling back to defaults on missing/invalid files.
pub async fn load_config_from_file(config_path: &Path) -> WorkerConfig {
    match tokio::fs::read_to_string(config_path).await {
        Ok(raw_config) => WorkerConfig::from_raw(&raw_config),
        Err(err) => {
            if err.kind() == std::io::ErrorKind::NotFound {
                tracing::info!(path = %config_path.display(), "No worker config file found, using defaults");
            } else {
                tracing::warn!("Failed to read worker config file: {}", err);
            }
            WorkerConfig::default()
        }
    }
}

/// Saves the config to the given path
pub async fn save_config_to_file(
    config: &WorkerConfig,
    config_path: &Path,
) -> Result<(), ConfigError> {
    let normalized = config.clone().normalized();
    let raw_config = serde_json::to_string_pretty(&normalized)?;
    tokio::fs::write(config_path, raw_config).await?;
    Ok(())
}

/// File config, then `TASKNOTES_*` overrides, then validation.
pub async fn load_worker_config(config_path: &Path) -> Result<WorkerConfig, ConfigError> {
    let config = apply_env_overrides(load_config_from_file(config_path).await);
    config.validate()?;
    Ok(config)
}

pub fn apply_env_overrides(mut config: WorkerConfig) -> WorkerConfig {
    if let Some(value) = read_env_value(OUTBOX_BATCH_SIZE_ENV) {
        config.outbox_worker.max_batch_size = value;
    }
    if let Some(value) = read_env_value(OUTBOX_POLL_INTERVAL_MS_ENV) {
        config.outbox_worker.polling_interval_ms = value;
    }
    if let Some(value) = read_env_value(OUTBOX_MAX_RETRY_ATTEMPTS_ENV) {
        config.outbox_worker.max_retry_attempts = value;
    }
    if let Some(value) = read_env_value(REMINDER_POLL_INTERVAL_SECS_ENV) {
        config.reminder_worker.polling_interval_secs = value;
    }
    if let Some(value) = read_env_value(REMINDER_BATCH_SIZE_ENV) {
        config.reminder_worker.max_reminders_per_batch = value;
    }
    if let Some(value) = read_env_value(SYNC_MAX_ITEMS_ENV) {
        config.sync.max_items_per_entity = value;
    }
    if let Some(value) = read_env_value::<String>(PUSH_WEBHOOK_URL_ENV) {
        config.push.webhook_url = Some(value);
    }
    config.normalized()
}

fn read_env_value<T>(name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = match std::env::var(name) {
        Ok(value) => value,
        Err(std::env::VarError::NotPresent) => return None,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to read {name}; ignoring");
            return None;
        }
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        tracing::warn!("{name} is set but empty; ignoring");
        return None;
    }

    match trimmed.parse::<T>() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(value = trimmed, error = %err, "Invalid {name}; ignoring");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use test_support::TestEnvGuard;

    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let config = load_config_from_file(&temp.path().join("worker.json")).await;
        assert_eq!(config, WorkerConfig::default());
    }

    #[tokio::test]
    async fn saved_config_round_trips_through_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("worker.json");
        let mut config = WorkerConfig::default();
        config.outbox_worker.max_batch_size = 7;
        config.push.webhook_url = Some(" https://push.example/hook ".to_string());

        save_config_to_file(&config, &path).await.unwrap();
        let loaded = load_config_from_file(&path).await;
        assert_eq!(loaded.outbox_worker.max_batch_size, 7);
        assert_eq!(
            loaded.push.webhook_url.as_deref(),
            Some("https://push.example/hook")
        );
    }

    #[tokio::test]
    async fn env_overrides_take_precedence_and_bad_values_are_ignored() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("worker.json");
        std::fs::write(&path, r#"{"outbox_worker":{"max_batch_size":20}}"#).unwrap();

        let mut env = TestEnvGuard::new(temp.path(), "sqlite::memory:".to_string());
        env.set(OUTBOX_BATCH_SIZE_ENV, "5");
        env.set(OUTBOX_MAX_RETRY_ATTEMPTS_ENV, "not-a-number");
        env.set(SYNC_MAX_ITEMS_ENV, " 25 ");

        let config = load_worker_config(&path).await.unwrap();
        assert_eq!(config.outbox_worker.max_batch_size, 5);
        assert_eq!(config.outbox_worker.max_retry_attempts, 5);
        assert_eq!(config.sync.max_items_per_entity, 25);
    }

    #[tokio::test]
    async fn invalid_override_fails_validation() {
        let temp = tempfile::tempdir().unwrap();
        let mut env = TestEnvGuard::new(temp.path(), "sqlite::memory:".to_string());
        env.set(REMINDER_BATCH_SIZE_ENV, "0");

        let err = load_worker_config(&temp.path().join("worker.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }
}

use anyhow::Error as AnyhowError;
use db::DbErr;
use services::services::{config::ConfigError, notification::NotificationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Notification(#[from] NotificationError),
    #[error(transparent)]
    Other(#[from] AnyhowError),
}

use db::{DbErr, models::outbox_message::OutboxMessageError};
use thiserror::Error;
use uuid::Uuid;

use crate::services::current_user::CurrentUserError;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch panicked: {0}")]
    Panicked(String),
    #[error("message {message_id} belongs to {owner} but dispatch ran as {current_user}")]
    OwnerMismatch {
        message_id: Uuid,
        owner: Uuid,
        current_user: Uuid,
    },
    #[error(transparent)]
    CurrentUser(#[from] CurrentUserError),
    #[error("failed to record processed message: {0}")]
    Persist(#[from] OutboxMessageError),
}

#[derive(Debug, Error)]
pub enum OutboxWorkerError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    Outbox(#[from] OutboxMessageError),
}

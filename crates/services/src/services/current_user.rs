use std::future::Future;

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CurrentUserError {
    #[error("no user is bound to the current call chain")]
    MissingContext,
}

/// Resolves the user on whose behalf the current call chain runs.
pub trait CurrentUser: Send + Sync {
    fn user_id(&self) -> Result<Uuid, CurrentUserError>;
}

/// Identity of the outbox message being dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxProcessingContext {
    pub message_id: Uuid,
    pub user_id: Uuid,
}

tokio::task_local! {
    static OUTBOX_CONTEXT: OutboxProcessingContext;
}

impl OutboxProcessingContext {
    pub fn new(message_id: Uuid, user_id: Uuid) -> Self {
        Self {
            message_id,
            user_id,
        }
    }

    /// Runs `fut` with this context installed. The previous value, if any, is
    /// back in place once the future completes, errors or unwinds.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        OUTBOX_CONTEXT.scope(self, fut).await
    }

    pub fn current() -> Option<Self> {
        OUTBOX_CONTEXT.try_with(|ctx| *ctx).ok()
    }
}

/// Resolves the owner of the outbox message currently being dispatched.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutboxContextUser;

impl CurrentUser for OutboxContextUser {
    fn user_id(&self) -> Result<Uuid, CurrentUserError> {
        OutboxProcessingContext::current()
            .map(|ctx| ctx.user_id)
            .ok_or(CurrentUserError::MissingContext)
    }
}

/// A user fixed up front, e.g. by an authenticated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticCurrentUser(pub Uuid);

impl CurrentUser for StaticCurrentUser {
    fn user_id(&self) -> Result<Uuid, CurrentUserError> {
        Ok(self.0)
    }
}

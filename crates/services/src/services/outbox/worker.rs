use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};

use db::{DBService, models::outbox_message::OutboxMessage};
use futures::FutureExt;
use tokio::{sync::watch, task::JoinHandle};
use utils_core::{
    clock::Clock,
    shutdown::{is_requested, sleep_or_shutdown},
};

use super::{
    dispatcher::MessageDispatcher,
    types::{DispatchError, OutboxWorkerError},
};
use crate::services::{config::OutboxWorkerConfig, current_user::OutboxProcessingContext};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub fetched: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Polls the outbox and hands each pending message to a dispatcher, one at a
/// time.
pub struct OutboxWorker<D> {
    db: DBService,
    dispatcher: D,
    clock: Arc<dyn Clock>,
    config: OutboxWorkerConfig,
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<D: MessageDispatcher + 'static> OutboxWorker<D> {
    pub fn new(
        db: DBService,
        dispatcher: D,
        clock: Arc<dyn Clock>,
        config: OutboxWorkerConfig,
    ) -> Self {
        Self {
            db,
            dispatcher,
            clock,
            config,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        tracing::info!(
            max_batch_size = self.config.max_batch_size,
            polling_interval_ms = self.config.polling_interval_ms,
            max_retry_attempts = self.config.max_retry_attempts,
            "outbox worker started"
        );

        loop {
            if is_requested(&shutdown) {
                break;
            }

            match self.process_batch(&shutdown).await {
                Ok(outcome) if outcome.fetched > 0 => {
                    tracing::debug!(
                        fetched = outcome.fetched,
                        processed = outcome.processed,
                        failed = outcome.failed,
                        "outbox batch finished"
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(error = %err, "outbox batch failed");
                }
            }

            if sleep_or_shutdown(self.config.polling_interval(), &shutdown).await {
                break;
            }
        }

        tracing::info!("outbox worker stopped");
    }

    /// One poll: fetch retryable messages and process them in order. Shutdown
    /// is honoured between messages, never in the middle of one.
    pub async fn process_batch(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<BatchOutcome, OutboxWorkerError> {
        let messages = OutboxMessage::fetch_retryable_batch(
            &self.db.pool,
            self.config.max_batch_size,
            self.config.max_retry_attempts,
        )
        .await?;

        let mut outcome = BatchOutcome {
            fetched: messages.len(),
            ..Default::default()
        };

        for message in messages {
            if is_requested(shutdown) {
                break;
            }

            let message_id = message.id;
            match self.process_message(message).await {
                Ok(true) => outcome.processed += 1,
                Ok(false) => outcome.failed += 1,
                Err(err) => {
                    outcome.failed += 1;
                    tracing::error!(%message_id, error = %err, "failed to record outbox outcome");
                }
            }
        }

        Ok(outcome)
    }

    /// Returns whether the message ended up processed.
    async fn process_message(&self, mut message: OutboxMessage) -> Result<bool, OutboxWorkerError> {
        let ctx = OutboxProcessingContext::new(message.id, message.user_id);
        let result = ctx
            .scope(async {
                self.dispatch_guarded(&message).await?;
                self.record_processed(&message).await
            })
            .await;

        let err = match result {
            Ok(()) => return Ok(true),
            Err(err) => err,
        };

        message.increment_attempt(self.clock.now(), err.to_string());
        message.save(&self.db.pool).await?;
        tracing::warn!(
            message_id = %message.id,
            message_type = %message.message_type,
            attempt_count = message.attempt_count,
            error = %err,
            "outbox dispatch failed"
        );

        if message.attempt_count >= self.config.max_retry_attempts {
            tracing::error!(
                message_id = %message.id,
                message_type = %message.message_type,
                attempt_count = message.attempt_count,
                "outbox message exhausted its retries and stays pending"
            );
        }
        Ok(false)
    }

    async fn dispatch_guarded(&self, message: &OutboxMessage) -> Result<(), DispatchError> {
        match AssertUnwindSafe(self.dispatcher.dispatch(message))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(DispatchError::Panicked(panic_message(panic))),
        }
    }

    async fn record_processed(&self, message: &OutboxMessage) -> Result<(), DispatchError> {
        let mut processed = message.clone();
        processed.mark_processed(self.clock.now())?;
        processed.save(&self.db.pool).await?;
        Ok(())
    }
}

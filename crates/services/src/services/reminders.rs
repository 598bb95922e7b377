use std::sync::Arc;

use db::{
    DBService, DbErr,
    models::task_item::{TaskItem, TaskItemError},
};
use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use utils_core::{
    clock::Clock,
    shutdown::{is_requested, sleep_or_shutdown},
};

use super::{config::ReminderWorkerConfig, notification::NotificationSink};

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    TaskItem(#[from] TaskItemError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReminderBatchOutcome {
    pub fetched: usize,
    pub sent: usize,
    pub skipped: usize,
}

/// Short text shown under the task title in the reminder push.
pub fn reminder_body(task: &TaskItem) -> String {
    match (task.notes.as_deref().map(str::trim), task.due_date) {
        (Some(notes), _) if !notes.is_empty() => notes.to_string(),
        (_, Some(due)) => format!("Due {}", due.format("%Y-%m-%d")),
        _ => "Reminder".to_string(),
    }
}

/// Sends due task reminders and stamps them as sent.
pub struct ReminderMonitor {
    db: DBService,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    config: ReminderWorkerConfig,
}

impl ReminderMonitor {
    pub fn new(
        db: DBService,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        config: ReminderWorkerConfig,
    ) -> Self {
        Self {
            db,
            sink,
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
            polling_interval_secs = self.config.polling_interval_secs,
            max_reminders_per_batch = self.config.max_reminders_per_batch,
            "reminder monitor started"
        );

        loop {
            if is_requested(&shutdown) {
                break;
            }

            match self.process_batch(&shutdown).await {
                Ok(outcome) if outcome.fetched > 0 => {
                    tracing::debug!(
                        fetched = outcome.fetched,
                        sent = outcome.sent,
                        skipped = outcome.skipped,
                        "reminder batch finished"
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(error = %err, "reminder batch failed");
                }
            }

            if sleep_or_shutdown(self.config.polling_interval(), &shutdown).await {
                break;
            }
        }

        tracing::info!("reminder monitor stopped");
    }

    pub async fn process_batch(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<ReminderBatchOutcome, ReminderError> {
        let tasks = TaskItem::find_overdue_reminders(
            &self.db.pool,
            self.clock.now(),
            self.config.max_reminders_per_batch,
        )
        .await?;

        let mut outcome = ReminderBatchOutcome {
            fetched: tasks.len(),
            ..Default::default()
        };

        for task in tasks {
            if is_requested(shutdown) {
                break;
            }

            let task_id = task.id;
            match self.remind(task).await {
                Ok(true) => outcome.sent += 1,
                Ok(false) => outcome.skipped += 1,
                Err(err) => {
                    outcome.skipped += 1;
                    tracing::error!(%task_id, error = %err, "failed to record sent reminder");
                }
            }
        }

        Ok(outcome)
    }

    /// Returns whether the reminder was delivered and recorded.
    async fn remind(&self, task: TaskItem) -> Result<bool, ReminderError> {
        let body = reminder_body(&task);
        if let Err(err) = self
            .sink
            .send_task_reminder(task.user_id, task.id, &task.title, &body)
            .await
        {
            tracing::warn!(
                task_id = %task.id,
                user_id = %task.user_id,
                error = %err,
                "reminder delivery failed; retrying next poll"
            );
            return Ok(false);
        }

        match TaskItem::save_reminder_sent(&self.db.pool, &task, self.clock.now()).await {
            Ok(_) => {
                tracing::debug!(task_id = %task.id, "reminder sent");
                Ok(true)
            }
            Err(
                err @ (TaskItemError::NotFound
                | TaskItemError::Deleted
                | TaskItemError::NoReminder
                | TaskItemError::ReminderAlreadySent
                | TaskItemError::ReminderAcknowledged
                | TaskItemError::ReminderRescheduled),
            ) => {
                tracing::warn!(task_id = %task.id, error = %err, "reminder no longer applies");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}

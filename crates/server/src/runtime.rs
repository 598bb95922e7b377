use std::sync::Arc;

use db::DBService;
use services::services::{
    config::{PushConfig, WorkerConfig},
    notification::{
        DevicePushNotifier, LogPushGateway, NotificationError, NotificationSink,
        WebhookPushGateway,
    },
    outbox::{OutboxDispatcher, OutboxWorker},
    reminders::ReminderMonitor,
};
use tokio::{sync::watch, task::JoinHandle};
use utils_core::{assets::database_path, clock::Clock};

const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// `DATABASE_URL` if set, otherwise a SQLite file in the asset dir.
pub fn database_url() -> std::io::Result<String> {
    if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
        let url = url.trim();
        if !url.is_empty() {
            return Ok(url.to_string());
        }
    }
    Ok(format!(
        "sqlite://{}?mode=rwc",
        database_path()?.to_string_lossy()
    ))
}

pub fn notification_sink(
    db: &DBService,
    push: &PushConfig,
) -> Result<Arc<dyn NotificationSink>, NotificationError> {
    match push.webhook_url.as_deref() {
        Some(url) => {
            tracing::info!(url, "Delivering pushes through webhook");
            let gateway = WebhookPushGateway::new(url)?;
            Ok(Arc::new(DevicePushNotifier::new(db.clone(), gateway)))
        }
        None => {
            tracing::info!("No push webhook configured, pushes are only logged");
            Ok(Arc::new(DevicePushNotifier::new(db.clone(), LogPushGateway)))
        }
    }
}

/// The two background loops of the host process.
pub struct Workers {
    outbox: JoinHandle<()>,
    reminders: JoinHandle<()>,
}

impl Workers {
    pub fn spawn(
        db: &DBService,
        config: &WorkerConfig,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let outbox = OutboxWorker::new(
            db.clone(),
            OutboxDispatcher::new(sink.clone()),
            clock.clone(),
            config.outbox_worker.clone(),
        )
        .spawn(shutdown.clone());

        let reminders = ReminderMonitor::new(
            db.clone(),
            sink,
            clock,
            config.reminder_worker.clone(),
        )
        .spawn(shutdown);

        Self { outbox, reminders }
    }

    /// Waits for both loops to return.
    pub async fn join(self) {
        let (outbox, reminders) = tokio::join!(self.outbox, self.reminders);
        for (name, result) in [("outbox", outbox), ("reminders", reminders)] {
            if let Err(err) = result {
                tracing::error!(worker = name, error = %err, "Worker task ended abnormally");
            }
        }
    }
}

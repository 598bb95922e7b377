use std::{sync::Arc, time::Duration};

use anyhow::Context;
use db::DBService;
use server::{
    ServerError,
    runtime::{Workers, database_url, notification_sink},
};
use services::services::config::load_worker_config;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, prelude::*};
use utils_core::{
    assets::{asset_dir, config_path},
    clock::SystemClock,
    shutdown::wait_for_watch_true,
};

const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_string = format!(
        "warn,server={level},services={level},db={level},utils_core={level}",
        level = log_level
    );
    let env_filter = EnvFilter::try_new(filter_string).context("Failed to create tracing filter")?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let assets = asset_dir()?;
    tracing::info!(path = %assets.display(), "Using asset directory");

    let config = load_worker_config(&config_path()?).await?;
    let db = DBService::new(&database_url()?).await?;
    let sink = notification_sink(&db, &config.push)?;

    let (shutdown_rx, force_exit_rx) = spawn_shutdown_watchers();
    let workers = Workers::spawn(
        &db,
        &config,
        sink,
        Arc::new(SystemClock),
        shutdown_rx.clone(),
    );
    tracing::info!("Workers running, press Ctrl+C to stop");

    wait_for_watch_true(shutdown_rx).await;

    tokio::select! {
        _ = workers.join() => {
            tracing::info!("Workers stopped");
        }
        _ = wait_for_watch_true(force_exit_rx) => {
            tracing::warn!("Force shutdown requested, exiting immediately");
            std::process::exit(130);
        }
        _ = tokio::time::sleep(WORKER_SHUTDOWN_TIMEOUT) => {
            tracing::warn!(
                "Workers did not stop within {:?}, exiting immediately",
                WORKER_SHUTDOWN_TIMEOUT
            );
            std::process::exit(130);
        }
    }

    Ok(())
}

fn spawn_shutdown_watchers() -> (watch::Receiver<bool>, watch::Receiver<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (force_exit_tx, force_exit_rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut shutdown_sent = false;

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(sig) => sig,
                Err(e) => {
                    tracing::error!("Failed to install SIGINT handler: {e}");
                    return;
                }
            };

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sig) => Some(sig),
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {e}");
                    None
                }
            };

            loop {
                tokio::select! {
                    _ = sigint.recv() => {},
                    _ = async {
                        if let Some(sigterm) = sigterm.as_mut() {
                            sigterm.recv().await;
                        } else {
                            std::future::pending::<()>().await;
                        }
                    } => {},
                }

                if !shutdown_sent {
                    shutdown_sent = true;
                    tracing::info!(
                        "Shutdown signal received, letting in-flight work finish (press Ctrl+C again to force)"
                    );
                    let _ = shutdown_tx.send(true);
                } else {
                    tracing::warn!("Second shutdown signal received, forcing exit");
                    let _ = force_exit_tx.send(true);
                    break;
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to install Ctrl+C handler: {e}");
                return;
            }

            tracing::info!(
                "Shutdown signal received, letting in-flight work finish (press Ctrl+C again to force)"
            );
            shutdown_sent = true;
            let _ = shutdown_tx.send(shutdown_sent);

            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to install Ctrl+C handler: {e}");
                return;
            }

            tracing::warn!("Second shutdown signal received, forcing exit");
            let _ = force_exit_tx.send(true);
        }
    });

    (shutdown_rx, force_exit_rx)
}

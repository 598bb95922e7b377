use std::time::Duration;

use tokio::sync::watch;

pub fn is_requested(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

/// Resolves once the flag turns `true`. A dropped sender never resolves.
pub async fn wait_for_watch_true(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }

        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sleeps for `duration`, returning early with `true` if shutdown was
/// requested in the meantime.
pub async fn sleep_or_shutdown(duration: Duration, rx: &watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => is_requested(rx),
        _ = wait_for_watch_true(rx.clone()) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_returns_early_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            sleep_or_shutdown(Duration::from_secs(30), &rx).await
        });

        tx.send(true).unwrap();
        let interrupted = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sleep should be interrupted")
            .unwrap();
        assert!(interrupted);
    }

    #[tokio::test]
    async fn sleep_completes_without_shutdown() {
        let (_tx, rx) = watch::channel(false);
        assert!(!sleep_or_shutdown(Duration::from_millis(5), &rx).await);
    }
}

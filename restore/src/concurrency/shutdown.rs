//! Shutdown signaling between the pipeline and the entry workers.
//!
//! A shutdown is a broadcast: every receiver cloned before the signal observes it, including
//! clones that start waiting after it was sent.

use tokio::sync::watch;

/// Transmitter side of the shutdown channel.
pub type ShutdownTx = watch::Sender<()>;

/// Receiver side of the shutdown channel.
pub type ShutdownRx = watch::Receiver<()>;

/// Creates a shutdown channel in the "not requested" state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, mut rx) = watch::channel(());
    rx.mark_unchanged();

    (tx, rx)
}

/// Waits until a shutdown is requested.
///
/// Never completes if every sender is dropped without requesting one.
pub async fn wait_for_shutdown(shutdown_rx: &mut ShutdownRx) {
    if shutdown_rx.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Returns whether a shutdown was requested and not yet observed through [`wait_for_shutdown`].
pub fn is_shutdown_requested(shutdown_rx: &ShutdownRx) -> bool {
    shutdown_rx.has_changed().unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn signal_reaches_every_receiver() {
        let (tx, mut rx) = create_shutdown_channel();
        let mut other_rx = rx.clone();
        assert!(!is_shutdown_requested(&rx));

        tx.send_replace(());

        assert!(is_shutdown_requested(&rx));
        wait_for_shutdown(&mut rx).await;
        wait_for_shutdown(&mut other_rx).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropped_sender_never_signals() {
        let (tx, mut rx) = create_shutdown_channel();
        drop(tx);

        let waited =
            tokio::time::timeout(Duration::from_millis(50), wait_for_shutdown(&mut rx)).await;
        assert!(waited.is_err());
        assert!(!is_shutdown_requested(&rx));
    }
}

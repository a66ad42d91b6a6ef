// External crates
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Process-wide shutdown signal built on a broadcast channel.
///
/// Every long-lived component either subscribes here or holds a child of the
/// runtime's cancellation token, which is cancelled once this fires.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// One message is ever sent, so a small buffer is enough.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(4);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    #[instrument(name = "helpers::shutdown::trigger", skip_all, level = "trace")]
    pub fn trigger(&self) {
        tracing::trace!(subscribers = self.tx.receiver_count(), "Shutdown triggered");
        let _ = self.tx.send(());
    }

    /// Resolves once `trigger()` has been called on any clone.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.recv().await;
    }

    /// Trigger on SIGINT or SIGTERM.
    pub async fn listen_for_signals(self) {
        wait_for_signal().await;
        self.trigger();
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler, only Ctrl-C will stop the agent");
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C"),
        Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_reaches_every_subscriber() {
        let shutdown = Shutdown::new();
        let mut early = shutdown.subscribe();
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait_for_shutdown().await })
        };
        tokio::task::yield_now().await;

        shutdown.trigger();

        assert!(early.recv().await.is_ok());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}

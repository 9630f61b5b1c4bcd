use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use eyre::Result;
use tokio::{signal, sync::broadcast, time::timeout};

/// Why the gateway is shutting down.
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    /// Graceful shutdown requested (SIGTERM, SIGINT)
    Graceful,
    /// Force shutdown (grace period exceeded)
    Force,
}

/// Coordinates shutdown between the signal handler, the accept loop and
/// in-flight requests.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
    /// Maximum time to wait for in-flight requests to drain.
    grace_period: Duration,
}

impl GracefulShutdown {
    pub fn new(grace_period: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            grace_period,
        }
    }

    /// Get a receiver for shutdown signals.
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Check if shutdown has been initiated.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Manually trigger shutdown (used by tests and in-process restarts).
    pub fn trigger_shutdown(&self, reason: ShutdownReason) -> Result<()> {
        self.initiate_shutdown(reason);
        Ok(())
    }

    /// Listen for OS signals and broadcast the shutdown once one arrives.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
            _ = Self::wait_for_sigterm() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
        }
        self.initiate_shutdown(ShutdownReason::Graceful);

        Ok(())
    }

    #[cfg(unix)]
    async fn wait_for_sigterm() {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    async fn wait_for_sigterm() {
        // On non-Unix systems only Ctrl+C is available.
        std::future::pending::<()>().await;
    }

    fn initiate_shutdown(&self, reason: ShutdownReason) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!("Processing shutdown signal: {:?}", reason);
            if let Err(e) = self.shutdown_tx.send(reason) {
                tracing::error!("Failed to send shutdown signal: {}", e);
            }
        } else {
            tracing::warn!("Shutdown already initiated, ignoring signal");
        }
    }

    /// Wait indefinitely for the first shutdown signal.
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        let mut receiver = self.subscribe();

        match receiver.recv().await {
            Ok(reason) => reason,
            Err(_) => {
                tracing::warn!("Shutdown channel closed unexpectedly");
                ShutdownReason::Force
            }
        }
    }

    /// Wait for `drain` to complete within the grace period. In-flight work
    /// that outlives the grace period is abandoned and the reason becomes
    /// [`ShutdownReason::Force`].
    pub async fn drain_within_grace<F>(&self, drain: F) -> ShutdownReason
    where
        F: Future<Output = ()>,
    {
        match timeout(self.grace_period, drain).await {
            Ok(()) => {
                tracing::info!("All in-flight requests drained");
                ShutdownReason::Graceful
            }
            Err(_) => {
                tracing::error!(
                    "Grace period exceeded ({:?}), forcing shutdown",
                    self.grace_period
                );
                ShutdownReason::Force
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_graceful_shutdown_creation() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(10));
        assert!(!shutdown.is_shutdown_initiated());
    }

    #[tokio::test]
    async fn test_manual_trigger_shutdown() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(10));
        let mut receiver = shutdown.subscribe();

        shutdown.trigger_shutdown(ShutdownReason::Graceful).unwrap();
        assert!(shutdown.is_shutdown_initiated());

        let reason = receiver.try_recv().unwrap();
        assert!(matches!(reason, ShutdownReason::Graceful));
    }

    #[tokio::test]
    async fn test_second_trigger_is_ignored() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(10));
        let mut receiver = shutdown.subscribe();

        shutdown.trigger_shutdown(ShutdownReason::Graceful).unwrap();
        shutdown.trigger_shutdown(ShutdownReason::Force).unwrap();

        assert!(matches!(
            receiver.try_recv().unwrap(),
            ShutdownReason::Graceful
        ));
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(10));
        let mut receiver1 = shutdown.subscribe();
        let mut receiver2 = shutdown.subscribe();

        shutdown.trigger_shutdown(ShutdownReason::Graceful).unwrap();

        assert!(matches!(
            receiver1.try_recv().unwrap(),
            ShutdownReason::Graceful
        ));
        assert!(matches!(
            receiver2.try_recv().unwrap(),
            ShutdownReason::Graceful
        ));
    }

    #[tokio::test]
    async fn test_drain_completes_within_grace() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(5));
        let reason = shutdown.drain_within_grace(async {}).await;
        assert!(matches!(reason, ShutdownReason::Graceful));
    }

    #[tokio::test]
    async fn test_drain_exceeding_grace_is_forced() {
        let shutdown = GracefulShutdown::new(Duration::from_millis(50));
        let reason = shutdown
            .drain_within_grace(tokio::time::sleep(Duration::from_secs(60)))
            .await;
        assert!(matches!(reason, ShutdownReason::Force));
    }
}

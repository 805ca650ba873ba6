use tokio_util::sync::CancellationToken;
use tracing::info;

/// Graceful shutdown coordinator.
///
/// Wraps a `CancellationToken` broadcast to the accept loop and any
/// background tasks. Termination signals are SIGINT, SIGTERM and SIGHUP;
/// all three mean "close the listener, release the instance lock, exit".
#[derive(Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Returns a clone of the cancellation token for use by tasks.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Triggers shutdown for all tasks listening on this token.
    pub fn trigger_shutdown(&self) {
        info!("shutdown signal received, broadcasting to all tasks");
        self.token.cancel();
    }

    /// Wait for a termination signal and trigger coordinated shutdown.
    pub async fn wait_for_signal_and_shutdown(&self) {
        use tokio::signal::unix::{signal, SignalKind};

        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");

        tokio::select! {
            _ = ctrl_c => {
                info!("received SIGINT (Ctrl+C)");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM");
            }
            _ = sighup.recv() => {
                info!("received SIGHUP");
            }
        }

        self.trigger_shutdown();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

//! Signal-driven cancellation of in-flight runs

use tokio_util::sync::CancellationToken;

/// Cancels running filter actions on Ctrl+C or SIGTERM
///
/// Runs stop between datasets; datasets already applied stay applied.
#[derive(Debug, Clone, Default)]
pub struct ShutdownService {
    token: CancellationToken,
}

impl ShutdownService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token handed to runs; cancelled once shutdown triggers
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Install OS signal handlers and auto-trigger on Ctrl+C/SIGTERM
    pub fn install_signal_handlers(&self) {
        let service = self.clone();
        tokio::spawn(async move {
            let ctrl_c = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut signal) => {
                        signal.recv().await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => tracing::debug!("Received Ctrl+C, cancelling run"),
                _ = terminate => tracing::debug!("Received SIGTERM, cancelling run"),
                _ = service.token.cancelled() => return,
            }

            service.trigger();
        });
    }
}

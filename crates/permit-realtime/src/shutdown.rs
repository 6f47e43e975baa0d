//! Shutdown signalling via `CancellationToken`.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared shutdown switch for the HTTP listener and anything else that
/// should stop accepting work.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Begin shutdown. Repeated calls are no-ops.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            info!("shutdown initiated");
        }
        self.token.cancel();
    }
}

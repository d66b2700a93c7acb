//! Process-wide shutdown signal plumbing
//!
//! One `Shutdown` handle is created at startup and cloned into every
//! component that blocks: the driver loop, the subprocess client, and the
//! inter-iteration sleeps. Signal handlers flip it; everything else only
//! observes it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Cloneable shutdown handle carrying the stop flag and cancellation token.
///
/// The flag answers the synchronous "should I start more work?" question;
/// the token unblocks suspended awaits. Both are set together by
/// `request()`.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    stop_requested: Arc<AtomicBool>,
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown: sets the stop flag and cancels the token.
    ///
    /// Idempotent and safe to call from a signal handler task.
    pub fn request(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.token.cancel();
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// The underlying cancellation token, for `tokio::select!` arms.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Sleep for `duration`, returning early (false) if shutdown fires.
    pub async fn sleep(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.token.cancelled() => false,
        }
    }
}

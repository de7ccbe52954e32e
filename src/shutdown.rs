//! Cooperative shutdown
//!
//! A [`ShutdownCoordinator`] is shared between the signal handler and the
//! harvest workers. Requesting shutdown never cancels in-flight work: workers
//! check the flag before claiming the next item and finish what they hold.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared handle to a shutdown coordinator
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Interruption flag plus a wakeup for tasks waiting on it
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    requested: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Requests shutdown; waiters are woken once
    pub fn request_shutdown(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            tracing::info!("Shutdown requested, finishing in-flight items");
            self.notify.notify_waiters();
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested
    pub async fn wait_for_shutdown(&self) {
        let notified = self.notify.notified();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}

//! Shutdown coordination.

use crate::types::Event;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::DownloadEngine;

impl DownloadEngine {
    /// Gracefully shut down the engine
    ///
    /// 1. Stops accepting new work (enqueue, retry, drain)
    /// 2. Cancels every active transfer; each deletes its partial file and
    ///    returns its task to `pending` so it resumes after restart
    /// 3. Waits for workers to unregister, bounded by `shutdown_grace`
    ///
    /// Calling it twice is harmless.
    pub async fn shutdown(&self) {
        tracing::info!("Initiating download engine shutdown");

        self.queue_state.accepting_new.store(false, Ordering::SeqCst);
        self.queue_state.shutdown.cancel();

        let active = self.active_count().await;
        if active > 0 {
            tracing::info!(active, "Cancelled active downloads, waiting for workers");
        }

        let grace = self.config.shutdown_grace;
        match tokio::time::timeout(grace, self.wait_for_active_downloads()).await {
            Ok(()) => tracing::info!("All active downloads stopped"),
            Err(_) => tracing::warn!(
                grace_secs = grace.as_secs(),
                "Timeout waiting for downloads to stop, proceeding with shutdown"
            ),
        }

        self.emit_event(Event::Shutdown);
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        !self.queue_state.accepting_new.load(Ordering::SeqCst)
    }

    async fn wait_for_active_downloads(&self) {
        loop {
            let active_count = self.active_count().await;
            if active_count == 0 {
                return;
            }

            tracing::debug!(active_count, "Waiting for active downloads to stop");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

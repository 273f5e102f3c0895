//! Download engine split into focused submodules.
//!
//! The `DownloadEngine` struct and its methods are organized by domain:
//! - [`queue`] - Enqueueing, manual retry of failed tasks, task lookups
//! - [`drain`] - Claiming a batch of pending tasks and dispatching it
//! - [`worker`] - A single download attempt and its retry bookkeeping
//! - [`control`] - Removal of tasks (with cooperative cancellation)
//! - [`lifecycle`] - Shutdown coordination
//! - [`progress`] - Monotonic progress reporting
//! - [`transfer`] - The transfer primitive (HTTP via reqwest)

mod control;
mod drain;
mod lifecycle;
pub mod progress;
mod queue;
pub mod transfer;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use drain::DrainReport;
pub use progress::ProgressReporter;
pub use transfer::{HttpTransfer, Transfer, TransferOutcome, TransferRequest};

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::storage::FileManager;
use crate::types::{DownloadId, Event};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

/// Queue and download state management
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Global cap on concurrent transfers (max_concurrent_downloads)
    pub(crate) concurrent_limit: Arc<Semaphore>,
    /// Map of active downloads to their cancellation tokens (for remove/shutdown)
    pub(crate) active_downloads: Arc<Mutex<HashMap<DownloadId, CancellationToken>>>,
    /// Destinations claimed by running attempts, so two episodes never share a file
    pub(crate) reserved_paths: Arc<Mutex<HashSet<PathBuf>>>,
    /// Flag to indicate whether new downloads are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Parent of every per-task token; cancelled on shutdown
    pub(crate) shutdown: CancellationToken,
}

/// Download engine (cloneable - all fields are Arc-wrapped)
///
/// Owns the pending/downloading/completed state of download tasks. Tasks are
/// stored in the database; a drain pass claims a bounded FIFO batch and runs
/// each task through one transfer attempt under the global concurrency cap.
#[derive(Clone)]
pub struct DownloadEngine {
    /// Database instance for persistence
    pub db: Arc<Database>,
    /// Layout of the download root
    pub(crate) files: FileManager,
    /// Transfer primitive used by workers
    pub(crate) transfer: Arc<dyn Transfer>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Queue and download state management
    pub(crate) queue_state: QueueState,
}

impl DownloadEngine {
    /// Create a new engine
    ///
    /// Tasks left `downloading` by a previous process are reset to `pending`
    /// with progress 0 before the engine accepts work.
    pub async fn new(
        db: Arc<Database>,
        config: Arc<Config>,
        transfer: Arc<dyn Transfer>,
        event_tx: broadcast::Sender<Event>,
    ) -> Result<Self> {
        let recovered = db.reset_interrupted_downloads().await?;
        if recovered > 0 {
            tracing::info!(
                count = recovered,
                "Reset interrupted downloads to pending"
            );
        }

        let queue_state = QueueState {
            concurrent_limit: Arc::new(Semaphore::new(config.download.max_concurrent_downloads)),
            active_downloads: Arc::new(Mutex::new(HashMap::new())),
            reserved_paths: Arc::new(Mutex::new(HashSet::new())),
            accepting_new: Arc::new(AtomicBool::new(true)),
            shutdown: CancellationToken::new(),
        };

        Ok(Self {
            db,
            files: FileManager::new(config.download_dir().clone()),
            transfer,
            config,
            event_tx,
            queue_state,
        })
    }

    /// Subscribe to engine events
    ///
    /// Each subscriber receives all events independently; one that falls
    /// behind by more than the channel capacity gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Filesystem helper rooted at the download directory
    pub fn files(&self) -> &FileManager {
        &self.files
    }

    /// Number of transfers currently registered as active
    pub async fn active_count(&self) -> usize {
        self.queue_state.active_downloads.lock().await.len()
    }

    /// Emit an event to all subscribers
    ///
    /// With no subscribers the event is dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

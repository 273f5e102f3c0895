//! Download removal with cooperative cancellation.

use crate::db::DownloadTask;
use crate::error::Result;
use crate::types::{DownloadId, DownloadStatus, Event};
use std::time::Duration;

use super::DownloadEngine;

impl DownloadEngine {
    /// Remove a download task
    ///
    /// The task moves to `deleted` from any state. If it is currently
    /// transferring, the transfer is cancelled and its partial file removed
    /// before this returns. With `delete_file`, the completed file is deleted
    /// from disk as well.
    ///
    /// The status write happens before cancellation, so a worker finishing at
    /// the same moment cannot resurrect the task. For a finished task the file
    /// goes first: if it cannot be deleted the record is left as it was.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::NotFound` for an unknown ID, or the I/O error if
    /// a finished task's file could not be deleted. Removing an already
    /// deleted task is not an error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use podkeep::downloader::DownloadEngine;
    /// # use podkeep::DownloadId;
    /// # async fn example(engine: DownloadEngine, id: DownloadId) -> podkeep::Result<()> {
    /// // Drop the record and the audio file
    /// engine.remove(id, true).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn remove(&self, id: DownloadId, delete_file: bool) -> Result<DownloadTask> {
        let task = self.get_download(id).await?;
        if task.status() == DownloadStatus::Deleted {
            tracing::debug!(download_id = id.0, "Download already removed");
            return Ok(task);
        }

        let mut file_deleted = false;
        if delete_file && task.status().is_terminal() {
            if let Some(path) = task.path() {
                file_deleted = self.files.delete_file(&path).await?;
            }
        }

        self.db.mark_deleted(id).await?;

        let token = self
            .queue_state
            .active_downloads
            .lock()
            .await
            .get(&id)
            .cloned();
        if let Some(token) = token {
            tracing::debug!(download_id = id.0, "Cancelling active transfer");
            token.cancel();
            self.wait_until_inactive(id).await;
        }

        if delete_file && !file_deleted {
            // Re-read: a worker may have recorded a path since the first lookup
            let current = self.get_download(id).await?;
            if let Some(path) = current.path() {
                match self.files.delete_file(&path).await {
                    Ok(deleted) => file_deleted = deleted,
                    Err(e) => {
                        tracing::warn!(download_id = id.0, path = %path.display(), error = %e, "Failed to delete file of removed download");
                    }
                }
            }
        }

        tracing::info!(download_id = id.0, file_deleted, "Download removed");
        self.emit_event(Event::Removed { id, file_deleted });

        self.get_download(id).await
    }

    /// Poll until the worker for `id` has unregistered, bounded by the shutdown grace
    async fn wait_until_inactive(&self, id: DownloadId) {
        let wait = async {
            loop {
                if !self.queue_state.active_downloads.lock().await.contains_key(&id) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };

        if tokio::time::timeout(self.config.shutdown_grace, wait)
            .await
            .is_err()
        {
            tracing::warn!(download_id = id.0, "Transfer did not stop in time after removal");
        }
    }
}

//! Enqueueing, manual retry, and task lookups.

use crate::db::DownloadTask;
use crate::error::{DatabaseError, DownloadError, Error, Result};
use crate::types::{DownloadId, DownloadStatus, EpisodeId, Event};
use std::path::Path;
use std::sync::atomic::Ordering;

use super::DownloadEngine;

impl DownloadEngine {
    /// Queue an episode for download
    ///
    /// Creates a `pending` task, or re-queues the episode's `failed`/`deleted`
    /// task keeping its retry count. Nothing is transferred until the next
    /// drain pass.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::AlreadyQueued`] if the episode has a pending or downloading task
    /// - [`Error::InsufficientSpace`] if the download root cannot hold the episode
    /// - [`Error::NotFound`] for an unknown episode
    /// - [`Error::ShuttingDown`] once shutdown has begun
    pub async fn enqueue(&self, episode_id: EpisodeId) -> Result<DownloadTask> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let episode = self
            .db
            .get_episode(episode_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("episode {}", episode_id)))?;

        let id = match self.db.get_download_for_episode(episode_id).await? {
            Some(task) => match task.status() {
                DownloadStatus::Pending | DownloadStatus::Downloading => {
                    return Err(already_queued(episode_id, task.id));
                }
                // Nothing to do; a finished file is not downloaded twice
                DownloadStatus::Completed => return Ok(task),
                DownloadStatus::Failed | DownloadStatus::Deleted => {
                    self.check_free_space(self.files.root(), episode.file_size)?;
                    if !self.db.requeue_download(task.id).await? {
                        // Lost a race with another enqueue
                        return Err(already_queued(episode_id, task.id));
                    }
                    task.id
                }
            },
            None => {
                self.check_free_space(self.files.root(), episode.file_size)?;
                match self.db.insert_download(episode_id).await {
                    Ok(id) => id,
                    Err(Error::Database(DatabaseError::ConstraintViolation(_))) => {
                        let existing = self.db.get_download_for_episode(episode_id).await?;
                        let existing_id = existing.map(|t| t.id).unwrap_or(DownloadId(0));
                        return Err(already_queued(episode_id, existing_id));
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        tracing::info!(download_id = id.0, episode_id = episode_id.0, title = %episode.title, "Episode queued");
        self.emit_event(Event::Queued { id, episode_id });

        self.get_download(id).await
    }

    /// Re-queue every `failed` task
    ///
    /// Retry counts are preserved, so a task keeps accumulating attempts across
    /// manual retries. Returns the re-queued task IDs.
    pub async fn retry_failed(&self) -> Result<Vec<DownloadId>> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let requeued = self.db.retry_failed_downloads().await?;
        for (id, episode_id) in &requeued {
            self.emit_event(Event::Queued {
                id: *id,
                episode_id: *episode_id,
            });
        }

        if !requeued.is_empty() {
            tracing::info!(count = requeued.len(), "Re-queued failed downloads");
        }
        Ok(requeued.into_iter().map(|(id, _)| id).collect())
    }

    /// Get one task
    pub async fn get_download(&self, id: DownloadId) -> Result<DownloadTask> {
        self.db
            .get_download(id)
            .await?
            .ok_or(Error::Download(DownloadError::NotFound { id: id.0 }))
    }

    /// List tasks in queue order, optionally filtered by status
    pub async fn list_downloads(&self, status: Option<DownloadStatus>) -> Result<Vec<DownloadTask>> {
        self.db.list_downloads(status).await
    }

    /// Reject work that cannot fit on disk
    ///
    /// Free space at `path` must exceed the advertised size, or the configured
    /// margin when the size is unknown. A failed space check is logged and does not block.
    pub(crate) fn check_free_space(&self, path: &Path, advertised_size: Option<i64>) -> Result<()> {
        if !self.config.disk_space.enabled {
            return Ok(());
        }

        let required = advertised_size
            .and_then(|s| u64::try_from(s).ok())
            .filter(|s| *s > 0)
            .unwrap_or(self.config.disk_space.min_free_space);

        match self.files.free_space(path) {
            Ok(available) if available <= required => {
                Err(Error::InsufficientSpace { required, available })
            }
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "Disk space check failed, proceeding anyway");
                Ok(())
            }
        }
    }
}

fn already_queued(episode_id: EpisodeId, id: DownloadId) -> Error {
    Error::Download(DownloadError::AlreadyQueued {
        episode_id: episode_id.0,
        id: id.0,
    })
}

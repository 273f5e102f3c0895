//! A single download attempt and the bookkeeping that follows it.
//!
//! The worker never sleeps for a retry. A failed attempt is written back to
//! the queue with a `next_attempt_at` deadline that later drain passes honour.

use crate::db::DownloadJob;
use crate::error::{Error, Result, TransferError};
use crate::retry::{self, IsRetryable, RetryDecision};
use crate::storage::FileManager;
use crate::types::{DownloadId, Event};
use crate::utils;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use super::DownloadEngine;
use super::progress::{self, ProgressReporter};
use super::transfer::TransferRequest;

/// How an attempt ended, from the point of view of the drain pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
    Completed,
    Retrying,
    Failed,
    Interrupted,
}

/// A file safely on disk, not yet recorded
struct FinishedFile {
    path: PathBuf,
    bytes: u64,
    content_type: Option<String>,
}

impl DownloadEngine {
    /// Run one attempt for a claimed task and record its result
    pub(crate) async fn run_attempt(
        &self,
        job: DownloadJob,
        cancel: CancellationToken,
    ) -> AttemptOutcome {
        let id = job.id;
        tracing::debug!(download_id = id.0, url = %job.audio_url, "Starting download attempt");

        let ext = utils::infer_extension(&job.audio_url, None);
        let outcome = match self.reserve_destination(&job, &ext).await {
            Ok(dest) => {
                let outcome = match self.attempt(&job, &dest, &ext, &cancel).await {
                    Ok(file) => self.record_success(id, file).await,
                    Err(e) => self.record_failure(&job, e).await,
                };
                self.queue_state.reserved_paths.lock().await.remove(&dest);
                outcome
            }
            Err(e) => self.record_failure(&job, e).await,
        };

        self.queue_state.active_downloads.lock().await.remove(&id);
        outcome
    }

    /// Pick a destination no other episode owns and reserve it for this attempt
    ///
    /// The plain `{date}-{slug}` name is used when free. Otherwise the episode
    /// id is appended, then a counter, until the name is unclaimed.
    async fn reserve_destination(&self, job: &DownloadJob, ext: &str) -> Result<PathBuf> {
        self.files.ensure_dir(&job.folder).await?;
        let base = self
            .files
            .episode_path(&job.folder, job.published(), &job.title, ext);

        let mut reserved = self.queue_state.reserved_paths.lock().await;
        let mut candidate = base.clone();
        let mut n = 0u32;
        while reserved.contains(&candidate) || self.path_taken(job.id, &candidate).await? {
            n += 1;
            let tag = if n == 1 {
                job.episode_id.to_string()
            } else {
                format!("{}-{}", job.episode_id, n)
            };
            candidate = FileManager::tagged_path(&base, &tag);
        }

        if candidate != base {
            tracing::debug!(
                download_id = job.id.0,
                path = %candidate.display(),
                "Filename already in use, using a tagged name"
            );
        }
        reserved.insert(candidate.clone());
        Ok(candidate)
    }

    async fn path_taken(&self, id: DownloadId, path: &Path) -> Result<bool> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(true);
        }
        self.db
            .file_path_in_use(&path.to_string_lossy(), id)
            .await
    }

    async fn attempt(
        &self,
        job: &DownloadJob,
        dest: &Path,
        ext: &str,
        cancel: &CancellationToken,
    ) -> Result<FinishedFile> {
        let dest = dest.to_path_buf();

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            permit = self.queue_state.concurrent_limit.clone().acquire_owned() => {
                permit.map_err(|_| Error::ShuttingDown)?
            }
        };

        self.check_free_space(&dest, job.file_size)?;

        let expected_size = job
            .file_size
            .and_then(|s| u64::try_from(s).ok())
            .filter(|s| *s > 0);
        let request = TransferRequest {
            url: &job.audio_url,
            dest: &dest,
            expected_size,
        };

        let reporter = ProgressReporter::new(job.id, self.event_tx.clone());
        let persister = progress::spawn_persister(self.db.clone(), &reporter);
        let ceiling = self.config.download.transfer_timeout;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            result = tokio::time::timeout(ceiling, self.transfer.download(request, &reporter, cancel)) => {
                result.unwrap_or(Err(TransferError::Timeout(ceiling)))
            }
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                drop(reporter);
                persister.await.ok();
                self.discard_partial(job.id, &dest).await;
                return Err(Error::Transfer(e));
            }
        };

        // The URL had no usable extension; trust the server's content type
        let final_ext = utils::infer_extension(&job.audio_url, outcome.content_type.as_deref());
        let renamed = dest.with_extension(&final_ext);
        let path = if final_ext != ext && !self.path_taken(job.id, &renamed).await.unwrap_or(true) {
            match tokio::fs::rename(&dest, &renamed).await {
                Ok(()) => renamed,
                Err(e) => {
                    tracing::warn!(download_id = job.id.0, error = %e, "Could not rename to match content type");
                    dest
                }
            }
        } else {
            dest
        };

        reporter.update(1.0);
        drop(reporter);
        persister.await.ok();

        Ok(FinishedFile {
            path,
            bytes: outcome.bytes_written,
            content_type: outcome.content_type,
        })
    }

    async fn record_success(&self, id: DownloadId, file: FinishedFile) -> AttemptOutcome {
        let path_str = file.path.to_string_lossy();
        let size = i64::try_from(file.bytes).unwrap_or(i64::MAX);

        match self
            .db
            .mark_completed(id, &path_str, size, file.content_type.as_deref())
            .await
        {
            Ok(true) => {
                tracing::info!(
                    download_id = id.0,
                    path = %file.path.display(),
                    size = %utils::format_file_size(file.bytes),
                    "Download completed"
                );
                self.emit_event(Event::Completed {
                    id,
                    path: file.path,
                    size_bytes: file.bytes,
                });
                AttemptOutcome::Completed
            }
            Ok(false) => {
                // Removed while the last bytes were being written
                tracing::debug!(download_id = id.0, "Task removed during transfer, discarding file");
                self.discard_partial(id, &file.path).await;
                AttemptOutcome::Interrupted
            }
            Err(e) => {
                tracing::error!(download_id = id.0, error = %e, "Failed to record completed download");
                if let Err(e) = self.db.release_claim(id).await {
                    tracing::error!(download_id = id.0, error = %e, "Failed to release claim");
                }
                AttemptOutcome::Interrupted
            }
        }
    }

    async fn record_failure(&self, job: &DownloadJob, error: Error) -> AttemptOutcome {
        let id = job.id;
        let consumed = u32::try_from(job.retry_count).unwrap_or(0);

        if matches!(
            error,
            Error::Cancelled | Error::ShuttingDown | Error::Transfer(TransferError::Cancelled)
        ) {
            tracing::info!(download_id = id.0, "Download interrupted, returning to queue");
            if let Err(e) = self.db.release_claim(id).await {
                tracing::error!(download_id = id.0, error = %e, "Failed to release claim");
            }
            return AttemptOutcome::Interrupted;
        }

        let message = error.to_string();

        // A pre-transfer shortfall fails fast without using up an attempt
        let attempts = if matches!(error, Error::InsufficientSpace { .. }) {
            consumed
        } else {
            consumed.saturating_add(1)
        };

        let decision = if error.is_retryable() {
            retry::next_step(&self.config.retry, attempts)
        } else {
            RetryDecision::GiveUp
        };

        match decision {
            RetryDecision::RetryAfter(delay) => {
                let now = chrono::Utc::now();
                let next_attempt_at = chrono::Duration::from_std(delay)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d))
                    .unwrap_or(now);
                match self
                    .db
                    .schedule_retry(id, attempts, next_attempt_at.timestamp(), &message)
                    .await
                {
                    Ok(true) => {
                        tracing::warn!(
                            download_id = id.0,
                            attempt = attempts,
                            max_attempts = self.config.retry.max_attempts,
                            delay_secs = delay.as_secs(),
                            error = %message,
                            "Download failed, retry scheduled"
                        );
                        self.emit_event(Event::RetryScheduled {
                            id,
                            retry_count: attempts,
                            next_attempt_at,
                            error: message,
                        });
                        AttemptOutcome::Retrying
                    }
                    Ok(false) => AttemptOutcome::Interrupted,
                    Err(e) => {
                        tracing::error!(download_id = id.0, error = %e, "Failed to schedule retry");
                        AttemptOutcome::Interrupted
                    }
                }
            }
            RetryDecision::GiveUp => match self.db.mark_failed(id, attempts, &message).await {
                Ok(true) => {
                    tracing::error!(
                        download_id = id.0,
                        attempts,
                        error = %message,
                        "Download failed"
                    );
                    self.emit_event(Event::Failed {
                        id,
                        error: message,
                        retry_count: attempts,
                    });
                    AttemptOutcome::Failed
                }
                Ok(false) => AttemptOutcome::Interrupted,
                Err(e) => {
                    tracing::error!(download_id = id.0, error = %e, "Failed to mark download failed");
                    AttemptOutcome::Interrupted
                }
            },
        }
    }

    async fn discard_partial(&self, id: DownloadId, path: &Path) {
        if let Err(e) = self.files.delete_file(path).await {
            tracing::warn!(download_id = id.0, path = %path.display(), error = %e, "Failed to delete partial file");
        }
    }
}

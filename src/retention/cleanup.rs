//! Cleanup pass: evaluates retention per podcast and removes what it selects.

use super::{PlayStateOracle, Verdict, evaluate};
use crate::downloader::DownloadEngine;
use crate::error::{Error, Result};
use crate::types::PodcastId;
use crate::utils;
use serde::Serialize;
use std::ops::AddAssign;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a cleanup pass did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    /// Podcasts evaluated
    pub podcasts: usize,
    /// Downloads removed
    pub deleted: usize,
    /// Bytes of the removed files, as recorded at completion
    pub bytes_freed: u64,
    /// Beyond the retention count but reported unplayed
    pub kept_unplayed: usize,
    /// Beyond the retention count but the oracle could not say
    pub kept_unknown: usize,
    /// Removals that failed
    pub failed: usize,
}

impl AddAssign for CleanupSummary {
    fn add_assign(&mut self, other: Self) {
        self.podcasts += other.podcasts;
        self.deleted += other.deleted;
        self.bytes_freed += other.bytes_freed;
        self.kept_unplayed += other.kept_unplayed;
        self.kept_unknown += other.kept_unknown;
        self.failed += other.failed;
    }
}

/// Retention coordinator
///
/// Deletions go through [`DownloadEngine::remove`] so a task being removed
/// while its transfer runs is cancelled first.
#[derive(Clone)]
pub struct Retention {
    engine: DownloadEngine,
    oracle: Option<Arc<dyn PlayStateOracle>>,
}

impl Retention {
    /// Create a coordinator; without an oracle retention is purely by age
    pub fn new(engine: DownloadEngine, oracle: Option<Arc<dyn PlayStateOracle>>) -> Self {
        Self { engine, oracle }
    }

    /// Whether deletions are gated on play state
    pub fn has_oracle(&self) -> bool {
        self.oracle.is_some()
    }

    /// Apply retention to one podcast, then prune empty directories
    ///
    /// A failed removal is logged and counted; the rest of the plan still runs.
    /// Cancellation is observed between removals.
    pub async fn cleanup_podcast(
        &self,
        podcast_id: PodcastId,
        cancel: &CancellationToken,
    ) -> Result<CleanupSummary> {
        let summary = self.apply(podcast_id, cancel).await?;
        if summary.deleted > 0 {
            self.prune().await;
        }
        Ok(summary)
    }

    /// Apply retention to every podcast
    pub async fn cleanup_all(&self, cancel: &CancellationToken) -> Result<CleanupSummary> {
        let podcasts = self.engine.db.list_podcasts().await?;
        if podcasts.is_empty() {
            debug!("No podcasts to clean up");
            return Ok(CleanupSummary::default());
        }

        info!(count = podcasts.len(), oracle = self.has_oracle(), "Cleaning up episodes");
        let mut total = CleanupSummary::default();

        for podcast in podcasts {
            if cancel.is_cancelled() {
                info!("Cleanup cancelled");
                break;
            }
            match self.apply(podcast.id, cancel).await {
                Ok(summary) => total += summary,
                Err(Error::Cancelled) => break,
                Err(e) => {
                    error!(podcast_id = podcast.id.0, title = %podcast.title, error = %e, "Error cleaning up podcast");
                }
            }
        }

        if total.deleted > 0 {
            self.prune().await;
        }

        info!(
            deleted = total.deleted,
            freed = %utils::format_file_size(total.bytes_freed),
            kept_unplayed = total.kept_unplayed,
            kept_unknown = total.kept_unknown,
            failed = total.failed,
            "Cleanup complete"
        );

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(total)
    }

    async fn apply(&self, podcast_id: PodcastId, cancel: &CancellationToken) -> Result<CleanupSummary> {
        let podcast = self
            .engine
            .db
            .get_podcast(podcast_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("podcast {}", podcast_id)))?;

        let candidates = self
            .engine
            .db
            .completed_downloads_for_podcast(podcast_id)
            .await?;
        let plan = evaluate(candidates, podcast.keep_count(), self.oracle.as_deref()).await;

        let mut summary = CleanupSummary {
            podcasts: 1,
            kept_unplayed: plan.count(Verdict::KeepUnplayed),
            kept_unknown: plan.count(Verdict::KeepUnknown),
            ..CleanupSummary::default()
        };

        for candidate in plan.to_delete() {
            if cancel.is_cancelled() {
                info!(podcast_id = podcast_id.0, "Cleanup cancelled between deletions");
                return Err(Error::Cancelled);
            }

            match self.engine.remove(candidate.id, true).await {
                Ok(_) => {
                    info!(
                        podcast_id = podcast_id.0,
                        download_id = candidate.id.0,
                        title = %candidate.title,
                        "Deleted old episode"
                    );
                    summary.deleted += 1;
                    summary.bytes_freed += candidate
                        .size_bytes
                        .and_then(|b| u64::try_from(b).ok())
                        .unwrap_or(0);
                }
                Err(e) => {
                    warn!(download_id = candidate.id.0, error = %e, "Failed to delete episode");
                    summary.failed += 1;
                }
            }
        }

        if summary.deleted > 0 || summary.kept_unplayed > 0 || summary.kept_unknown > 0 {
            info!(
                podcast_id = podcast_id.0,
                title = %podcast.title,
                deleted = summary.deleted,
                kept_unplayed = summary.kept_unplayed,
                kept_unknown = summary.kept_unknown,
                "Retention applied"
            );
        }

        Ok(summary)
    }

    async fn prune(&self) {
        match self.engine.files().prune_empty_dirs().await {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "Pruned empty directories"),
            Err(e) => warn!(error = %e, "Failed to prune empty directories"),
        }
    }
}

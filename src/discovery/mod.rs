//! Episode discovery: reconciles a podcast's remote feed with local state.
//!
//! A pass fetches the feed, inserts episodes whose guid the podcast has not
//! seen before, and hands new episodes to the download engine when the
//! podcast auto-downloads. Known episodes are never rewritten.

pub mod feed;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use feed::{FeedEpisode, FeedSource, HttpFeedSource, ParsedFeed};

use crate::db::{Database, NewEpisode, NewPodcast, Podcast};
use crate::downloader::DownloadEngine;
use crate::error::{DatabaseError, DownloadError, Error, Result};
use crate::types::{Event, PodcastId};
use crate::utils;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of one discovery pass over one podcast
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    /// Podcast that was checked
    pub podcast_id: PodcastId,
    /// Episodes inserted by this pass
    pub new_episodes: usize,
    /// Feed entries the podcast already had
    pub existing: usize,
    /// Entries that could not be inserted
    pub failed: usize,
    /// New episodes handed to the download engine
    pub queued: usize,
}

/// Totals for a pass over every podcast
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DiscoverySummary {
    /// Podcasts whose feed was fetched and reconciled
    pub podcasts_checked: usize,
    /// Podcasts whose fetch or reconcile failed
    pub podcasts_failed: usize,
    /// Episodes inserted across all podcasts
    pub new_episodes: usize,
    /// Episodes queued across all podcasts
    pub queued: usize,
}

/// Options for a new subscription
#[derive(Clone, Debug)]
pub struct SubscribeOptions {
    /// Most recent episodes always kept (clamped to 1-100)
    pub retention: u32,
    /// Queue newly discovered episodes automatically
    pub auto_download: bool,
}

/// Episode Discovery Coordinator
#[derive(Clone)]
pub struct DiscoveryCoordinator {
    db: Arc<Database>,
    engine: DownloadEngine,
    source: Arc<dyn FeedSource>,
}

impl DiscoveryCoordinator {
    /// Create a coordinator that enqueues into `engine`
    pub fn new(engine: DownloadEngine, source: Arc<dyn FeedSource>) -> Self {
        Self {
            db: engine.db.clone(),
            engine,
            source,
        }
    }

    /// Run one discovery pass for a podcast
    ///
    /// `last_checked` is updated only when the fetch succeeded; a fetch failure
    /// is recorded on the podcast and returned. Cancellation is observed
    /// between episodes.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown podcast, `Feed` when the feed cannot be
    /// fetched or parsed, `Cancelled` when cancelled mid-pass.
    pub async fn discover(
        &self,
        podcast_id: PodcastId,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryReport> {
        let podcast = self
            .db
            .get_podcast(podcast_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("podcast {}", podcast_id)))?;

        debug!(podcast_id = podcast_id.0, url = %podcast.feed_url, "Discovering episodes");

        let parsed = match self.source.fetch_feed(&podcast.feed_url).await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(podcast_id = podcast_id.0, error = %e, "Feed fetch failed");
                if let Err(db_err) = self.db.record_podcast_error(podcast_id, &e.to_string()).await {
                    error!(podcast_id = podcast_id.0, error = %db_err, "Failed to record feed error");
                }
                return Err(Error::Feed(e));
            }
        };

        self.reconcile(&podcast, parsed, cancel).await
    }

    /// Run a discovery pass for every podcast, oldest subscription first
    ///
    /// A failing podcast is logged and counted; it does not stop the others.
    pub async fn discover_all(&self, cancel: &CancellationToken) -> Result<DiscoverySummary> {
        let podcasts = self.db.list_podcasts().await?;
        if podcasts.is_empty() {
            debug!("No podcasts to discover");
            return Ok(DiscoverySummary::default());
        }

        info!(count = podcasts.len(), "Refreshing podcast feeds");
        let mut summary = DiscoverySummary::default();

        for podcast in podcasts {
            if cancel.is_cancelled() {
                info!("Discovery cancelled");
                return Err(Error::Cancelled);
            }

            match self.discover(podcast.id, cancel).await {
                Ok(report) => {
                    summary.podcasts_checked += 1;
                    summary.new_episodes += report.new_episodes;
                    summary.queued += report.queued;
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    error!(podcast_id = podcast.id.0, title = %podcast.title, error = %e, "Error refreshing podcast");
                    summary.podcasts_failed += 1;
                }
            }
        }

        info!(
            checked = summary.podcasts_checked,
            failed = summary.podcasts_failed,
            new_episodes = summary.new_episodes,
            queued = summary.queued,
            "Feed refresh complete"
        );
        Ok(summary)
    }

    /// Subscribe to a feed and run its first discovery pass
    ///
    /// Subscribing to a URL that is already stored returns the stored podcast
    /// untouched. The feed is fetched before anything is written, so an
    /// unreachable feed leaves no record behind.
    pub async fn subscribe(
        &self,
        feed_url: &str,
        options: SubscribeOptions,
        cancel: &CancellationToken,
    ) -> Result<Podcast> {
        let feed_url = feed_url.trim();
        url::Url::parse(feed_url)
            .map_err(|e| Error::InvalidInput(format!("feed URL {}: {}", feed_url, e)))?;

        if let Some(existing) = self.db.get_podcast_by_url(feed_url).await? {
            info!(podcast_id = existing.id.0, title = %existing.title, "Podcast already exists");
            return Ok(existing);
        }

        info!(url = feed_url, "Adding podcast");
        let parsed = self.source.fetch_feed(feed_url).await?;

        let title = if parsed.title.is_empty() {
            "Unknown Podcast".to_string()
        } else {
            parsed.title.clone()
        };
        let new_podcast = NewPodcast {
            feed_url: feed_url.to_string(),
            folder: utils::sanitize_folder_name(&title),
            title,
            retention: i64::from(options.retention.clamp(1, 100)),
            auto_download: options.auto_download,
        };

        let id = match self.db.insert_podcast(&new_podcast).await {
            Ok(id) => id,
            // Lost a race with a concurrent subscribe to the same URL
            Err(Error::Database(DatabaseError::ConstraintViolation(_))) => {
                return self
                    .db
                    .get_podcast_by_url(feed_url)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("podcast {}", feed_url)));
            }
            Err(e) => return Err(e),
        };

        let podcast = self
            .db
            .get_podcast(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("podcast {}", id)))?;
        info!(podcast_id = id.0, title = %podcast.title, "Created podcast");

        if let Err(e) = self.reconcile(&podcast, parsed, cancel).await {
            warn!(podcast_id = id.0, error = %e, "First discovery pass did not finish");
        }

        self.db
            .get_podcast(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("podcast {}", id)))
    }

    /// Apply a fetched feed to a podcast
    async fn reconcile(
        &self,
        podcast: &Podcast,
        parsed: ParsedFeed,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryReport> {
        let podcast_id = podcast.id;

        if !parsed.title.is_empty() && parsed.title != podcast.title {
            debug!(podcast_id = podcast_id.0, title = %parsed.title, "Refreshing podcast title");
            if let Err(e) = self.db.update_podcast_title(podcast_id, &parsed.title).await {
                warn!(podcast_id = podcast_id.0, error = %e, "Failed to refresh podcast title");
            }
        }

        let mut report = DiscoveryReport {
            podcast_id,
            new_episodes: 0,
            existing: 0,
            failed: 0,
            queued: 0,
        };

        for candidate in parsed.episodes {
            if cancel.is_cancelled() {
                info!(podcast_id = podcast_id.0, "Discovery cancelled between episodes");
                return Err(Error::Cancelled);
            }

            let episode = NewEpisode {
                podcast_id,
                guid: candidate.guid,
                title: candidate.title,
                description: candidate.description,
                audio_url: candidate.audio_url,
                published_at: candidate.published_at.map(|dt| dt.timestamp()),
                file_size: candidate.file_size.and_then(|n| i64::try_from(n).ok()),
            };

            let episode_id = match self.db.insert_episode_if_new(&episode).await {
                Ok(Some(id)) => id,
                Ok(None) => {
                    report.existing += 1;
                    continue;
                }
                Err(e) => {
                    warn!(podcast_id = podcast_id.0, guid = %episode.guid, error = %e, "Skipping episode");
                    report.failed += 1;
                    continue;
                }
            };

            report.new_episodes += 1;
            debug!(podcast_id = podcast_id.0, episode_id = episode_id.0, title = %episode.title, "New episode");

            if podcast.auto_download {
                match self.engine.enqueue(episode_id).await {
                    Ok(_) => report.queued += 1,
                    Err(Error::Download(DownloadError::AlreadyQueued { .. })) => {
                        debug!(episode_id = episode_id.0, "Episode already queued");
                    }
                    Err(e) => {
                        warn!(episode_id = episode_id.0, title = %episode.title, error = %e, "Could not queue episode");
                    }
                }
            }
        }

        self.db
            .mark_podcast_checked(podcast_id, chrono::Utc::now().timestamp())
            .await?;

        if report.new_episodes > 0 {
            info!(
                podcast_id = podcast_id.0,
                new_episodes = report.new_episodes,
                queued = report.queued,
                "Discovered new episodes"
            );
        } else {
            debug!(podcast_id = podcast_id.0, "No new episodes");
        }

        self.engine.emit_event(Event::EpisodesDiscovered {
            podcast_id,
            new_episodes: report.new_episodes,
        });

        Ok(report)
    }
}

//! `Podkeep`: the composition root and the control surface.
//!
//! Every component is constructed here, explicitly, and shared by handle.
//! A thin API layer only needs this type.

use crate::config::Config;
use crate::db::{Database, DownloadTask, Episode, Podcast};
use crate::discovery::{
    DiscoveryCoordinator, DiscoveryReport, DiscoverySummary, FeedSource, HttpFeedSource,
    SubscribeOptions,
};
use crate::downloader::{DownloadEngine, HttpTransfer, Transfer};
use crate::error::{Error, Result};
use crate::jobs;
use crate::retention::{CleanupSummary, PlayStateOracle, PlexOracle, Retention};
use crate::scheduler::{JobInfo, Scheduler};
use crate::types::{DownloadId, DownloadStatus, EpisodeId, Event, PodcastId};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Swappable collaborators; [`Podkeep::new`] uses the HTTP ones
pub struct Collaborators {
    /// Audio transfer primitive
    pub transfer: Arc<dyn Transfer>,
    /// Feed fetcher and parser
    pub feeds: Arc<dyn FeedSource>,
    /// Optional play-state oracle
    pub oracle: Option<Arc<dyn PlayStateOracle>>,
}

/// A podcast mirror (cloneable - all fields are Arc-wrapped)
///
/// # Examples
///
/// ```no_run
/// use podkeep::{Config, Podkeep};
/// use podkeep::discovery::SubscribeOptions;
///
/// # async fn example() -> podkeep::Result<()> {
/// let podkeep = Podkeep::new(Config::default()).await?;
/// podkeep.start().await;
///
/// podkeep
///     .subscribe(
///         "https://example.com/feed.xml",
///         SubscribeOptions { retention: 5, auto_download: true },
///     )
///     .await?;
///
/// podkeep.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Podkeep {
    /// Database instance for persistence
    pub db: Arc<Database>,
    config: Arc<Config>,
    engine: DownloadEngine,
    discovery: DiscoveryCoordinator,
    retention: Retention,
    scheduler: Scheduler,
    plex: Option<Arc<PlexOracle>>,
    event_tx: broadcast::Sender<Event>,
    /// Cancels discovery and cleanup started through the control surface
    shutdown: CancellationToken,
}

impl Podkeep {
    /// Build a mirror with HTTP transfers, HTTP feeds and, when configured, Plex
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let transfer = Arc::new(HttpTransfer::new(&config.download.user_agent)?);
        let feeds = Arc::new(HttpFeedSource::new(
            config.feed.request_timeout,
            &config.feed.user_agent,
        )?);
        let plex = match &config.plex {
            Some(plex_config) => Some(Arc::new(PlexOracle::new(plex_config)?)),
            None => None,
        };

        let collaborators = Collaborators {
            transfer,
            feeds,
            oracle: plex.clone().map(|p| p as Arc<dyn PlayStateOracle>),
        };

        let mut podkeep = Self::with_collaborators(config, collaborators).await?;
        podkeep.plex = plex;
        Ok(podkeep)
    }

    /// Build a mirror around caller-supplied collaborators
    pub async fn with_collaborators(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(config.download_dir())
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download_dir().display(),
                        e
                    ),
                ))
            })?;

        let db = Arc::new(Database::new(&config.storage.database_path).await?);
        let (event_tx, _rx) = broadcast::channel(1000);
        let config = Arc::new(config);

        let engine = DownloadEngine::new(
            db.clone(),
            config.clone(),
            collaborators.transfer,
            event_tx.clone(),
        )
        .await?;
        let discovery = DiscoveryCoordinator::new(engine.clone(), collaborators.feeds);
        let retention = Retention::new(engine.clone(), collaborators.oracle);
        let scheduler = Scheduler::new(event_tx.clone(), config.shutdown_grace);

        let table = jobs::job_table(&config, &engine, &discovery, &retention);
        jobs::register_all(&scheduler, table).await?;

        Ok(Self {
            db,
            config,
            engine,
            discovery,
            retention,
            scheduler,
            plex: None,
            event_tx,
            shutdown: CancellationToken::new(),
        })
    }

    /// Arm the job timers (and check Plex, if configured)
    pub async fn start(&self) {
        if let Some(plex) = &self.plex {
            if let Err(e) = plex.test_connection().await {
                warn!(error = %e, "Plex connection test failed; unplayed checks will report unknown");
            }
        }
        self.scheduler.start().await;
        info!(
            download_dir = %self.config.download_dir().display(),
            "podkeep started"
        );
    }

    /// Stop the scheduler and the download engine together
    ///
    /// Running jobs and transfers are cancelled and awaited up to the
    /// configured grace period.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down");
        self.shutdown.cancel();
        tokio::join!(self.scheduler.stop(), self.engine.shutdown());
        info!("Shutdown complete");
        Ok(())
    }

    /// Subscribe to events from every component
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The download engine
    pub fn engine(&self) -> &DownloadEngine {
        &self.engine
    }

    /// The job scheduler
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // Jobs

    /// Every registered job, sorted by id
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        self.scheduler.list().await
    }

    /// Run a job now
    pub async fn trigger_job(&self, id: &str) -> Result<()> {
        self.scheduler.trigger(id).await
    }

    /// Pause a job's timer
    pub async fn pause_job(&self, id: &str) -> Result<()> {
        self.scheduler.pause(id).await
    }

    /// Resume a job's timer
    pub async fn resume_job(&self, id: &str) -> Result<()> {
        self.scheduler.resume(id).await
    }

    // Downloads

    /// Queue an episode for download
    pub async fn enqueue_episode(&self, episode_id: EpisodeId) -> Result<DownloadTask> {
        self.engine.enqueue(episode_id).await
    }

    /// List download tasks, optionally by status
    pub async fn list_downloads(&self, status: Option<DownloadStatus>) -> Result<Vec<DownloadTask>> {
        self.engine.list_downloads(status).await
    }

    /// Look up a download task
    pub async fn get_download(&self, id: DownloadId) -> Result<DownloadTask> {
        self.engine.get_download(id).await
    }

    /// Re-queue every failed download
    pub async fn retry_failed(&self) -> Result<Vec<DownloadId>> {
        self.engine.retry_failed().await
    }

    /// Remove a download, cancelling it if it is transferring
    pub async fn remove_download(&self, id: DownloadId, delete_file: bool) -> Result<DownloadTask> {
        self.engine.remove(id, delete_file).await
    }

    // Discovery

    /// Run discovery for one podcast
    pub async fn discover_podcast(&self, id: PodcastId) -> Result<DiscoveryReport> {
        self.discovery.discover(id, &self.shutdown).await
    }

    /// Run discovery for every podcast
    pub async fn discover_all(&self) -> Result<DiscoverySummary> {
        self.discovery.discover_all(&self.shutdown).await
    }

    // Cleanup

    /// Apply retention to one podcast
    pub async fn cleanup_podcast(&self, id: PodcastId) -> Result<CleanupSummary> {
        self.retention.cleanup_podcast(id, &self.shutdown).await
    }

    /// Apply retention to every podcast
    pub async fn cleanup_all(&self) -> Result<CleanupSummary> {
        self.retention.cleanup_all(&self.shutdown).await
    }

    // Podcasts

    /// Subscribe to a feed and run its first discovery pass
    pub async fn subscribe(&self, feed_url: &str, options: SubscribeOptions) -> Result<Podcast> {
        self.discovery
            .subscribe(feed_url, options, &self.shutdown)
            .await
    }

    /// Options for a subscription that uses the configured defaults
    pub fn default_subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions {
            retention: self.config.retention.default_keep,
            auto_download: true,
        }
    }

    /// All podcasts, oldest subscription first
    pub async fn list_podcasts(&self) -> Result<Vec<Podcast>> {
        self.db.list_podcasts().await
    }

    /// A podcast's episodes, newest first
    pub async fn list_episodes(&self, podcast_id: PodcastId) -> Result<Vec<Episode>> {
        self.podcast(podcast_id).await?;
        self.db.list_episodes(podcast_id).await
    }

    /// Change retention and auto-download; `None` leaves a setting unchanged
    ///
    /// Retention is clamped to 1-100.
    pub async fn update_podcast(
        &self,
        podcast_id: PodcastId,
        retention: Option<u32>,
        auto_download: Option<bool>,
    ) -> Result<Podcast> {
        let retention = retention.map(|r| i64::from(r.clamp(1, 100)));
        if !self
            .db
            .update_podcast_settings(podcast_id, retention, auto_download)
            .await?
        {
            return Err(Error::NotFound(format!("podcast {}", podcast_id)));
        }

        info!(podcast_id = podcast_id.0, ?retention, ?auto_download, "Updated podcast settings");
        self.podcast(podcast_id).await
    }

    /// Remove a podcast, its episodes and its downloads
    ///
    /// Active transfers are cancelled first. With `delete_files`, audio files
    /// are deleted and empty folders pruned. Returns the number of download
    /// tasks removed.
    pub async fn unsubscribe(&self, podcast_id: PodcastId, delete_files: bool) -> Result<usize> {
        let podcast = self.podcast(podcast_id).await?;

        let mut removed = 0;
        for task in self.db.list_downloads_for_podcast(podcast_id).await? {
            if task.status() == DownloadStatus::Deleted && !delete_files {
                continue;
            }
            self.engine.remove(task.id, delete_files).await?;
            removed += 1;
        }

        self.db.delete_podcast(podcast_id).await?;
        if delete_files {
            if let Err(e) = self.engine.files().prune_empty_dirs().await {
                warn!(error = %e, "Failed to prune empty directories");
            }
        }

        info!(podcast_id = podcast_id.0, title = %podcast.title, removed, "Unsubscribed");
        Ok(removed)
    }

    async fn podcast(&self, id: PodcastId) -> Result<Podcast> {
        self.db
            .get_podcast(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("podcast {}", id)))
    }
}

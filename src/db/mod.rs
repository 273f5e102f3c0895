//! Database layer for podkeep
//!
//! Handles SQLite persistence for podcasts, episodes, and download tasks.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`podcasts`] - Subscription CRUD and discovery bookkeeping
//! - [`episodes`] - Episode inserts scoped by (podcast, guid)
//! - [`downloads`] - Download task state machine, queue claiming, retention queries

use crate::types::{DownloadId, DownloadStatus, EpisodeId, PodcastId};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

mod downloads;
mod episodes;
mod migrations;
mod podcasts;

/// New podcast subscription to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewPodcast {
    /// Feed URL (unique)
    pub feed_url: String,
    /// Title from the feed
    pub title: String,
    /// Folder name under the download root
    pub folder: String,
    /// Number of most recent episodes always kept (1-100)
    pub retention: i64,
    /// Queue newly discovered episodes automatically
    pub auto_download: bool,
}

/// Podcast record from database
#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct Podcast {
    /// Unique database ID
    pub id: PodcastId,
    /// Feed URL (unique)
    pub feed_url: String,
    /// Title from the feed
    pub title: String,
    /// Folder name under the download root
    pub folder: String,
    /// Number of most recent episodes always kept (1-100)
    pub retention: i64,
    /// Queue newly discovered episodes automatically
    pub auto_download: bool,
    /// Unix timestamp of the last successful discovery pass
    pub last_checked: Option<i64>,
    /// Error from the last failed fetch, cleared on success
    pub last_error: Option<String>,
    /// Unix timestamp when the subscription was created
    pub created_at: i64,
}

impl Podcast {
    /// Retention count as used by the evaluator
    pub fn keep_count(&self) -> usize {
        self.retention.clamp(1, 100) as usize
    }
}

/// New episode to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewEpisode {
    /// Podcast this episode belongs to
    pub podcast_id: PodcastId,
    /// Feed-provided identifier, unique within the podcast
    pub guid: String,
    /// Episode title
    pub title: String,
    /// Sanitized description text
    pub description: Option<String>,
    /// Enclosure URL
    pub audio_url: String,
    /// Unix timestamp of publication
    pub published_at: Option<i64>,
    /// Enclosure length advertised by the feed
    pub file_size: Option<i64>,
}

/// Episode record from database
#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct Episode {
    /// Unique database ID
    pub id: EpisodeId,
    /// Podcast this episode belongs to
    pub podcast_id: PodcastId,
    /// Feed-provided identifier, unique within the podcast
    pub guid: String,
    /// Episode title
    pub title: String,
    /// Sanitized description text
    pub description: Option<String>,
    /// Enclosure URL
    pub audio_url: String,
    /// Unix timestamp of publication
    pub published_at: Option<i64>,
    /// Enclosure length advertised by the feed
    pub file_size: Option<i64>,
    /// Unix timestamp when the episode was discovered
    pub created_at: i64,
}

/// Download task record from database
#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct DownloadTask {
    /// Unique database ID
    pub id: DownloadId,
    /// Episode being downloaded (one task per episode)
    pub episode_id: EpisodeId,
    /// Current status (see [`DownloadStatus::from_i32`])
    pub status: i32,
    /// Download progress as a fraction (0.0-1.0)
    pub progress: f32,
    /// Attempts that ended in a retryable failure, cumulative across manual retries
    pub retry_count: i64,
    /// Error message from the most recent failed attempt
    pub last_error: Option<String>,
    /// Destination file once known
    pub file_path: Option<String>,
    /// Bytes written on completion
    pub size_bytes: Option<i64>,
    /// Content type reported by the server
    pub content_type: Option<String>,
    /// Unix timestamp when the task was (re)queued
    pub queued_at: i64,
    /// Earliest unix timestamp a drain pass may claim the task again
    pub next_attempt_at: Option<i64>,
    /// Unix timestamp when the current or last attempt started
    pub started_at: Option<i64>,
    /// Unix timestamp when the download completed
    pub completed_at: Option<i64>,
}

impl DownloadTask {
    /// Decoded status
    pub fn status(&self) -> DownloadStatus {
        DownloadStatus::from_i32(self.status)
    }

    /// Retry count as an unsigned attempt counter
    pub fn attempts(&self) -> u32 {
        u32::try_from(self.retry_count).unwrap_or(0)
    }

    /// Destination path, if one has been assigned
    pub fn path(&self) -> Option<PathBuf> {
        self.file_path.as_ref().map(PathBuf::from)
    }
}

/// A claimed task joined with what the worker needs to run it
#[derive(Debug, Clone, FromRow)]
pub struct DownloadJob {
    /// Download task ID
    pub id: DownloadId,
    /// Episode ID
    pub episode_id: EpisodeId,
    /// Attempts consumed before this one
    pub retry_count: i64,
    /// Enclosure URL
    pub audio_url: String,
    /// Episode title (used for the filename)
    pub title: String,
    /// Unix timestamp of publication (used for the filename)
    pub published_at: Option<i64>,
    /// Enclosure length advertised by the feed
    pub file_size: Option<i64>,
    /// Podcast folder name
    pub folder: String,
}

impl DownloadJob {
    /// Publication time as a chrono timestamp
    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.published_at
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
    }
}

/// A completed download considered by the retention evaluator
#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct RetentionCandidate {
    /// Download task ID
    pub id: DownloadId,
    /// Episode ID
    pub episode_id: EpisodeId,
    /// Episode title
    pub title: String,
    /// Unix timestamp of publication
    pub published_at: Option<i64>,
    /// File on disk
    pub file_path: Option<String>,
    /// Bytes on disk
    pub size_bytes: Option<i64>,
}

/// Database handle
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

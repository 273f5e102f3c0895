//! Podcast subscription CRUD and discovery bookkeeping.

use crate::error::DatabaseError;
use crate::types::PodcastId;
use crate::{Error, Result};

use super::{Database, NewPodcast, Podcast};

const PODCAST_COLUMNS: &str = "id, feed_url, title, folder, retention, auto_download, \
     last_checked, last_error, created_at";

impl Database {
    /// Insert a new podcast subscription
    pub async fn insert_podcast(&self, podcast: &NewPodcast) -> Result<PodcastId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO podcasts (feed_url, title, folder, retention, auto_download, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&podcast.feed_url)
        .bind(&podcast.title)
        .bind(&podcast.folder)
        .bind(podcast.retention)
        .bind(podcast.auto_download)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Database(DatabaseError::ConstraintViolation(format!(
                    "podcast with feed URL {} already exists",
                    podcast.feed_url
                )))
            }
            _ => Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert podcast: {}",
                e
            ))),
        })?;

        Ok(PodcastId(result.last_insert_rowid()))
    }

    /// Get a podcast by ID
    pub async fn get_podcast(&self, id: PodcastId) -> Result<Option<Podcast>> {
        let sql = format!("SELECT {} FROM podcasts WHERE id = ?", PODCAST_COLUMNS);
        let row = sqlx::query_as::<_, Podcast>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get podcast: {}",
                    e
                )))
            })?;

        Ok(row)
    }

    /// Get a podcast by its feed URL
    pub async fn get_podcast_by_url(&self, feed_url: &str) -> Result<Option<Podcast>> {
        let sql = format!("SELECT {} FROM podcasts WHERE feed_url = ?", PODCAST_COLUMNS);
        let row = sqlx::query_as::<_, Podcast>(&sql)
            .bind(feed_url)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get podcast by URL: {}",
                    e
                )))
            })?;

        Ok(row)
    }

    /// List all podcasts, oldest subscription first
    pub async fn list_podcasts(&self) -> Result<Vec<Podcast>> {
        let sql = format!("SELECT {} FROM podcasts ORDER BY id ASC", PODCAST_COLUMNS);
        let rows = sqlx::query_as::<_, Podcast>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list podcasts: {}",
                    e
                )))
            })?;

        Ok(rows)
    }

    /// Update retention and auto-download settings
    ///
    /// `None` leaves the field unchanged. Returns false if the podcast doesn't exist.
    pub async fn update_podcast_settings(
        &self,
        id: PodcastId,
        retention: Option<i64>,
        auto_download: Option<bool>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE podcasts
            SET retention = COALESCE(?, retention),
                auto_download = COALESCE(?, auto_download)
            WHERE id = ?
            "#,
        )
        .bind(retention)
        .bind(auto_download)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update podcast settings: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Refresh the podcast title from its feed
    pub async fn update_podcast_title(&self, id: PodcastId, title: &str) -> Result<()> {
        sqlx::query("UPDATE podcasts SET title = ? WHERE id = ?")
            .bind(title)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update podcast title: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Record a successful discovery pass
    pub async fn mark_podcast_checked(&self, id: PodcastId, checked_at: i64) -> Result<()> {
        sqlx::query("UPDATE podcasts SET last_checked = ?, last_error = NULL WHERE id = ?")
            .bind(checked_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to mark podcast checked: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Record a failed fetch; `last_checked` is left untouched
    pub async fn record_podcast_error(&self, id: PodcastId, error: &str) -> Result<()> {
        sqlx::query("UPDATE podcasts SET last_error = ? WHERE id = ?")
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to record podcast error: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Delete a podcast; episodes and download records cascade
    pub async fn delete_podcast(&self, id: PodcastId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM podcasts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete podcast: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }
}

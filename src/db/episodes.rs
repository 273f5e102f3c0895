//! Episode inserts and lookups, scoped by (podcast, guid).

use crate::error::DatabaseError;
use crate::types::{EpisodeId, PodcastId};
use crate::{Error, Result};

use super::{Database, Episode, NewEpisode};

const EPISODE_COLUMNS: &str = "id, podcast_id, guid, title, description, audio_url, \
     published_at, file_size, created_at";

impl Database {
    /// Insert an episode unless the podcast already has one with the same guid
    ///
    /// Returns the new ID, or `None` when the episode already existed. Existing
    /// rows are never updated.
    pub async fn insert_episode_if_new(&self, episode: &NewEpisode) -> Result<Option<EpisodeId>> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO episodes (
                podcast_id, guid, title, description, audio_url,
                published_at, file_size, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (podcast_id, guid) DO NOTHING
            "#,
        )
        .bind(episode.podcast_id)
        .bind(&episode.guid)
        .bind(&episode.title)
        .bind(&episode.description)
        .bind(&episode.audio_url)
        .bind(episode.published_at)
        .bind(episode.file_size)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert episode {}: {}",
                episode.guid, e
            )))
        })?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(Some(EpisodeId(result.last_insert_rowid())))
    }

    /// Get an episode by ID
    pub async fn get_episode(&self, id: EpisodeId) -> Result<Option<Episode>> {
        let sql = format!("SELECT {} FROM episodes WHERE id = ?", EPISODE_COLUMNS);
        let row = sqlx::query_as::<_, Episode>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get episode: {}",
                    e
                )))
            })?;

        Ok(row)
    }

    /// Whether the podcast already knows this guid
    pub async fn episode_exists(&self, podcast_id: PodcastId, guid: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT id FROM episodes WHERE podcast_id = ? AND guid = ?")
                .bind(podcast_id)
                .bind(guid)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to check episode existence: {}",
                        e
                    )))
                })?;

        Ok(found.is_some())
    }

    /// List a podcast's episodes, newest first (undated last)
    pub async fn list_episodes(&self, podcast_id: PodcastId) -> Result<Vec<Episode>> {
        let sql = format!(
            "SELECT {} FROM episodes WHERE podcast_id = ? \
             ORDER BY published_at IS NULL, published_at DESC, id DESC",
            EPISODE_COLUMNS
        );
        let rows = sqlx::query_as::<_, Episode>(&sql)
            .bind(podcast_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list episodes: {}",
                    e
                )))
            })?;

        Ok(rows)
    }
}

//! Download task CRUD, queue claiming and state transitions.
//!
//! Every transition out of `downloading` is conditional on the row still being
//! `downloading`, so a concurrent removal always wins over a finishing worker.

use crate::error::DatabaseError;
use crate::types::{DownloadId, DownloadStatus, EpisodeId, PodcastId};
use crate::{Error, Result};

use super::{Database, DownloadJob, DownloadTask, RetentionCandidate};

const TASK_COLUMNS: &str = "id, episode_id, status, progress, retry_count, last_error, \
     file_path, size_bytes, content_type, queued_at, next_attempt_at, started_at, completed_at";

const NEXT_QUEUE_SEQ: &str = "(SELECT COALESCE(MAX(queue_seq), 0) + 1 FROM downloads)";

const PENDING: i32 = 0;
const DOWNLOADING: i32 = 1;
const COMPLETED: i32 = 2;
const FAILED: i32 = 3;
const DELETED: i32 = 4;

fn query_failed(what: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!(
        "Failed to {}: {}",
        what, e
    )))
}

impl Database {
    /// Insert a new pending task at the back of the queue
    pub async fn insert_download(&self, episode_id: EpisodeId) -> Result<DownloadId> {
        let now = chrono::Utc::now().timestamp();

        let sql = format!(
            "INSERT INTO downloads (episode_id, status, progress, retry_count, queue_seq, queued_at) \
             VALUES (?, ?, 0.0, 0, {}, ?)",
            NEXT_QUEUE_SEQ
        );
        let result = sqlx::query(&sql)
            .bind(episode_id)
            .bind(PENDING)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    Error::Database(DatabaseError::ConstraintViolation(format!(
                        "episode {} already has a download task",
                        episode_id
                    )))
                }
                _ => query_failed("insert download", e),
            })?;

        Ok(DownloadId(result.last_insert_rowid()))
    }

    /// Get a download task by ID
    pub async fn get_download(&self, id: DownloadId) -> Result<Option<DownloadTask>> {
        let sql = format!("SELECT {} FROM downloads WHERE id = ?", TASK_COLUMNS);
        sqlx::query_as::<_, DownloadTask>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("get download", e))
    }

    /// Get the task belonging to an episode, if it was ever queued
    pub async fn get_download_for_episode(
        &self,
        episode_id: EpisodeId,
    ) -> Result<Option<DownloadTask>> {
        let sql = format!("SELECT {} FROM downloads WHERE episode_id = ?", TASK_COLUMNS);
        sqlx::query_as::<_, DownloadTask>(&sql)
            .bind(episode_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("get download for episode", e))
    }

    /// List tasks in queue order, optionally filtered by status
    pub async fn list_downloads(&self, status: Option<DownloadStatus>) -> Result<Vec<DownloadTask>> {
        let sql = format!(
            "SELECT {} FROM downloads WHERE (? IS NULL OR status = ?) ORDER BY queue_seq ASC, id ASC",
            TASK_COLUMNS
        );
        let status = status.map(|s| s.to_i32());
        sqlx::query_as::<_, DownloadTask>(&sql)
            .bind(status)
            .bind(status)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("list downloads", e))
    }

    /// List every task for a podcast's episodes
    pub async fn list_downloads_for_podcast(
        &self,
        podcast_id: PodcastId,
    ) -> Result<Vec<DownloadTask>> {
        let sql = format!(
            "SELECT {} FROM downloads WHERE episode_id IN \
             (SELECT id FROM episodes WHERE podcast_id = ?) ORDER BY id ASC",
            TASK_COLUMNS
        );
        sqlx::query_as::<_, DownloadTask>(&sql)
            .bind(podcast_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("list downloads for podcast", e))
    }

    /// Put a `failed` or `deleted` task back at the end of the queue
    ///
    /// Progress resets to 0; retry_count is preserved. Returns false if the task
    /// was not in one of those states.
    pub async fn requeue_download(&self, id: DownloadId) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let sql = format!(
            "UPDATE downloads \
             SET status = ?, progress = 0.0, last_error = NULL, next_attempt_at = NULL, \
                 started_at = NULL, completed_at = NULL, queued_at = ?, queue_seq = {} \
             WHERE id = ? AND status IN (?, ?)",
            NEXT_QUEUE_SEQ
        );
        let result = sqlx::query(&sql)
            .bind(PENDING)
            .bind(now)
            .bind(id)
            .bind(FAILED)
            .bind(DELETED)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("requeue download", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Atomically claim up to `limit` eligible pending tasks, oldest-queued first
    ///
    /// The claim is a single UPDATE, so two concurrent drains can never receive
    /// the same task. Returned jobs are in queue order.
    pub async fn claim_pending(&self, limit: usize, now: i64) -> Result<Vec<DownloadJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut claimed: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            UPDATE downloads
            SET status = ?, started_at = ?, progress = 0.0
            WHERE id IN (
                SELECT id FROM downloads
                WHERE status = ? AND (next_attempt_at IS NULL OR next_attempt_at <= ?)
                ORDER BY queue_seq ASC, id ASC
                LIMIT ?
            )
            RETURNING id, queue_seq
            "#,
        )
        .bind(DOWNLOADING)
        .bind(now)
        .bind(PENDING)
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("claim pending downloads", e))?;

        claimed.sort_by_key(|&(id, seq)| (seq, id));

        let mut jobs = Vec::with_capacity(claimed.len());
        for (id, _) in claimed {
            let job = sqlx::query_as::<_, DownloadJob>(
                r#"
                SELECT d.id, d.episode_id, d.retry_count, e.audio_url, e.title,
                       e.published_at, e.file_size, p.folder
                FROM downloads d
                JOIN episodes e ON e.id = d.episode_id
                JOIN podcasts p ON p.id = e.podcast_id
                WHERE d.id = ?
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("load claimed download", e))?;

            // A cascade delete between claim and load leaves nothing to run
            if let Some(job) = job {
                jobs.push(job);
            }
        }

        Ok(jobs)
    }

    /// Store progress for an active task; never moves progress backwards
    pub async fn update_progress(&self, id: DownloadId, progress: f32) -> Result<()> {
        sqlx::query(
            "UPDATE downloads SET progress = ? WHERE id = ? AND status = ? AND progress < ?",
        )
        .bind(progress)
        .bind(id)
        .bind(DOWNLOADING)
        .bind(progress)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("update progress", e))?;

        Ok(())
    }

    /// Record a finished transfer
    pub async fn mark_completed(
        &self,
        id: DownloadId,
        file_path: &str,
        size_bytes: i64,
        content_type: Option<&str>,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = ?, progress = 1.0, file_path = ?, size_bytes = ?, content_type = ?,
                last_error = NULL, next_attempt_at = NULL, completed_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(COMPLETED)
        .bind(file_path)
        .bind(size_bytes)
        .bind(content_type)
        .bind(now)
        .bind(id)
        .bind(DOWNLOADING)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("mark download completed", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Return a failed attempt to the back of the queue with a backoff deadline
    pub async fn schedule_retry(
        &self,
        id: DownloadId,
        retry_count: u32,
        next_attempt_at: i64,
        error: &str,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let sql = format!(
            "UPDATE downloads \
             SET status = ?, progress = 0.0, retry_count = ?, last_error = ?, \
                 next_attempt_at = ?, queued_at = ?, queue_seq = {} \
             WHERE id = ? AND status = ?",
            NEXT_QUEUE_SEQ
        );
        let result = sqlx::query(&sql)
            .bind(PENDING)
            .bind(i64::from(retry_count))
            .bind(error)
            .bind(next_attempt_at)
            .bind(now)
            .bind(id)
            .bind(DOWNLOADING)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("schedule retry", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Move an active task to terminal `failed`
    pub async fn mark_failed(&self, id: DownloadId, retry_count: u32, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = ?, progress = 0.0, retry_count = ?, last_error = ?, next_attempt_at = NULL
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(FAILED)
        .bind(i64::from(retry_count))
        .bind(error)
        .bind(id)
        .bind(DOWNLOADING)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("mark download failed", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Give an interrupted claim back without consuming a retry
    ///
    /// The task keeps its queue position.
    pub async fn release_claim(&self, id: DownloadId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE downloads SET status = ?, progress = 0.0, started_at = NULL \
             WHERE id = ? AND status = ?",
        )
        .bind(PENDING)
        .bind(id)
        .bind(DOWNLOADING)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("release download claim", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a task to `deleted`, whatever its current state
    ///
    /// Returns false if it was already deleted.
    pub async fn mark_deleted(&self, id: DownloadId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE downloads SET status = ?, progress = 0.0, next_attempt_at = NULL \
             WHERE id = ? AND status != ?",
        )
        .bind(DELETED)
        .bind(id)
        .bind(DELETED)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("mark download deleted", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Whether another live task already owns `file_path`
    ///
    /// Deleted tasks are ignored; their files, if kept, are caught by the
    /// on-disk check in the worker.
    pub async fn file_path_in_use(&self, file_path: &str, except: DownloadId) -> Result<bool> {
        let (in_use,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM downloads WHERE file_path = ? AND id != ? AND status != ?)",
        )
        .bind(file_path)
        .bind(except)
        .bind(DELETED)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_failed("check file path", e))?;

        Ok(in_use)
    }

    /// Re-queue every `failed` task, preserving retry counts
    pub async fn retry_failed_downloads(&self) -> Result<Vec<(DownloadId, EpisodeId)>> {
        let now = chrono::Utc::now().timestamp();
        let sql = format!(
            "UPDATE downloads \
             SET status = ?, progress = 0.0, next_attempt_at = NULL, started_at = NULL, \
                 queued_at = ?, queue_seq = {} \
             WHERE status = ? \
             RETURNING id, episode_id",
            NEXT_QUEUE_SEQ
        );
        let mut rows: Vec<(DownloadId, EpisodeId)> = sqlx::query_as(&sql)
            .bind(PENDING)
            .bind(now)
            .bind(FAILED)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("retry failed downloads", e))?;

        rows.sort_by_key(|(id, _)| *id);
        Ok(rows)
    }

    /// Reset tasks left `downloading` by an unclean exit
    pub async fn reset_interrupted_downloads(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE downloads SET status = ?, progress = 0.0, started_at = NULL WHERE status = ?",
        )
        .bind(PENDING)
        .bind(DOWNLOADING)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("reset interrupted downloads", e))?;

        Ok(result.rows_affected())
    }

    /// Completed downloads of a podcast, newest publication first (undated last)
    pub async fn completed_downloads_for_podcast(
        &self,
        podcast_id: PodcastId,
    ) -> Result<Vec<RetentionCandidate>> {
        sqlx::query_as::<_, RetentionCandidate>(
            r#"
            SELECT d.id, d.episode_id, e.title, e.published_at, d.file_path, d.size_bytes
            FROM downloads d
            JOIN episodes e ON e.id = d.episode_id
            WHERE e.podcast_id = ? AND d.status = ?
            ORDER BY e.published_at IS NULL, e.published_at DESC, e.id DESC
            "#,
        )
        .bind(podcast_id)
        .bind(COMPLETED)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list completed downloads", e))
    }
}

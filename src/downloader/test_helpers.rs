//! Shared test helpers for creating DownloadEngine instances in tests.

use crate::config::Config;
use crate::db::{Database, NewEpisode, NewPodcast};
use crate::downloader::{DownloadEngine, ProgressReporter, Transfer, TransferOutcome, TransferRequest};
use crate::error::TransferError;
use crate::types::{EpisodeId, PodcastId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

/// Scripted behaviour for one URL
#[derive(Clone)]
pub(crate) enum FakeBehavior {
    /// Write the body and succeed
    Succeed {
        body: Vec<u8>,
        content_type: Option<String>,
    },
    /// Fail with a network error
    NetworkError,
    /// Fail with an HTTP status
    BadStatus(u16),
    /// Write some bytes, then report a full disk
    DiskFull,
    /// Block until cancelled
    Hang,
    /// Wait until the gate opens (is cancelled), then succeed with the body
    Gated { gate: CancellationToken, body: Vec<u8> },
}

/// In-memory transfer that follows a per-URL script
pub(crate) struct FakeTransfer {
    script: std::sync::Mutex<HashMap<String, FakeBehavior>>,
    pub(crate) calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub(crate) max_in_flight: AtomicUsize,
}

impl FakeTransfer {
    pub(crate) fn new() -> Self {
        Self {
            script: std::sync::Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set(&self, url: &str, behavior: FakeBehavior) {
        self.script.lock().unwrap().insert(url.to_string(), behavior);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn behavior(&self, url: &str) -> FakeBehavior {
        self.script
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(FakeBehavior::Succeed {
                body: vec![7u8; 4096],
                content_type: Some("audio/mpeg".to_string()),
            })
    }

    async fn write_body(
        request: &TransferRequest<'_>,
        body: &[u8],
        progress: &ProgressReporter,
    ) -> Result<u64, TransferError> {
        let total = body.len() as u64;
        let mut written = Vec::with_capacity(body.len());
        for chunk in body.chunks(512) {
            written.extend_from_slice(chunk);
            progress.update_bytes(written.len() as u64, Some(total));
        }
        tokio::fs::write(request.dest, &written).await?;
        Ok(total)
    }
}

#[async_trait]
impl Transfer for FakeTransfer {
    async fn download(
        &self,
        request: TransferRequest<'_>,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match self.behavior(request.url) {
            FakeBehavior::Succeed { body, content_type } => {
                Self::write_body(&request, &body, progress)
                    .await
                    .map(|bytes_written| TransferOutcome {
                        bytes_written,
                        content_type,
                    })
            }
            FakeBehavior::NetworkError => Err(TransferError::Network("connection reset".into())),
            FakeBehavior::BadStatus(code) => Err(TransferError::BadStatus(code)),
            FakeBehavior::DiskFull => {
                tokio::fs::write(request.dest, b"partial").await.ok();
                Err(TransferError::StorageFull { written: 7 })
            }
            FakeBehavior::Hang => {
                tokio::fs::write(request.dest, b"partial").await.ok();
                cancel.cancelled().await;
                Err(TransferError::Cancelled)
            }
            FakeBehavior::Gated { gate, body } => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(TransferError::Cancelled),
                    _ = gate.cancelled() => {
                        Self::write_body(&request, &body, progress)
                            .await
                            .map(|bytes_written| TransferOutcome {
                                bytes_written,
                                content_type: Some("audio/mpeg".to_string()),
                            })
                    }
                }
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Config suitable for tests: no disk space check, no jitter, immediate retries
pub(crate) fn test_config(temp_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.storage.database_path = temp_dir.join("test.db");
    config.storage.download_dir = temp_dir.join("downloads");
    config.download.max_concurrent_downloads = 3;
    config.download.transfer_timeout = Duration::from_secs(30);
    config.disk_space.enabled = false;
    config.retry.max_attempts = 3;
    config.retry.initial_delay = Duration::ZERO;
    config.retry.max_delay = Duration::ZERO;
    config.retry.jitter = false;
    config.shutdown_grace = Duration::from_secs(5);
    config
}

/// Helper to create a test DownloadEngine with a persistent database and a fake transfer.
/// Returns the engine, the fake, and the tempdir (which must be kept alive).
pub(crate) async fn create_test_engine() -> (DownloadEngine, Arc<FakeTransfer>, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path());
    let (engine, fake) = create_test_engine_with(config).await;
    (engine, fake, temp_dir)
}

/// Same as [`create_test_engine`] with a caller-supplied config
pub(crate) async fn create_test_engine_with(config: Config) -> (DownloadEngine, Arc<FakeTransfer>) {
    let db = Database::new(&config.storage.database_path).await.unwrap();
    let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);
    let fake = Arc::new(FakeTransfer::new());

    let engine = DownloadEngine::new(
        Arc::new(db),
        Arc::new(config),
        fake.clone() as Arc<dyn Transfer>,
        event_tx,
    )
    .await
    .unwrap();

    (engine, fake)
}

/// Insert a podcast for tests
pub(crate) async fn seed_podcast(db: &Database, feed_url: &str) -> PodcastId {
    db.insert_podcast(&NewPodcast {
        feed_url: feed_url.to_string(),
        title: "Test Show".to_string(),
        folder: "Test Show".to_string(),
        retention: 3,
        auto_download: false,
    })
    .await
    .unwrap()
}

/// Insert an episode whose audio URL is `https://cdn.example.com/{guid}.mp3`
pub(crate) async fn seed_episode(
    db: &Database,
    podcast_id: PodcastId,
    guid: &str,
    published_at: i64,
) -> EpisodeId {
    db.insert_episode_if_new(&NewEpisode {
        podcast_id,
        guid: guid.to_string(),
        title: format!("Episode {}", guid),
        description: None,
        audio_url: episode_url(guid),
        published_at: Some(published_at),
        file_size: None,
    })
    .await
    .unwrap()
    .unwrap()
}

/// Audio URL used by [`seed_episode`]
pub(crate) fn episode_url(guid: &str) -> String {
    format!("https://cdn.example.com/{}.mp3", guid)
}

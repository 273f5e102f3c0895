use super::test_helpers::*;
use super::*;
use crate::downloader::test_helpers::{create_test_engine, seed_podcast};
use crate::error::{ErrorKind, FeedError};
use crate::types::DownloadStatus;
use tempfile::TempDir;


const FEED_URL: &str = "https://example.com/feed.xml";

/// Coordinator over a fresh engine, with one podcast subscribed to `FEED_URL`
async fn setup() -> (DiscoveryCoordinator, Arc<FakeFeedSource>, PodcastId, TempDir) {
    let (engine, _transfer, temp_dir) = create_test_engine().await;
    let podcast_id = seed_podcast(&engine.db, FEED_URL).await;
    let source = Arc::new(FakeFeedSource::new());
    let coordinator = DiscoveryCoordinator::new(engine, source.clone() as Arc<dyn FeedSource>);
    (coordinator, source, podcast_id, temp_dir)
}

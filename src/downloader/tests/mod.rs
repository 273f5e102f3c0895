use super::test_helpers::*;
use super::*;
use crate::error::{DownloadError, Error, ErrorKind};
use crate::types::{DownloadId, DownloadStatus, EpisodeId, Event};
use std::time::Duration;


/// Seed `count` episodes (published one day apart, oldest first) and enqueue them in order
async fn enqueue_episodes(engine: &DownloadEngine, count: usize) -> Vec<(EpisodeId, DownloadId)> {
    let podcast_id = seed_podcast(&engine.db, "https://example.com/feed.xml").await;
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let episode_id =
            seed_episode(&engine.db, podcast_id, &format!("ep-{}", i), 1_704_067_200 + i as i64 * 86_400).await;
        let task = engine.enqueue(episode_id).await.unwrap();
        out.push((episode_id, task.id));
    }
    out
}

/// Poll until `check` holds, failing the test after two seconds
async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn status_of(engine: &DownloadEngine, id: DownloadId) -> DownloadStatus {
    engine.get_download(id).await.unwrap().status()
}

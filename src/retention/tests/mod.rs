use super::*;
use crate::db::RetentionCandidate;
use crate::downloader::DownloadEngine;
use crate::downloader::test_helpers::{create_test_engine, seed_episode, seed_podcast};
use crate::types::{DownloadId, DownloadStatus, EpisodeId, PlayState, PodcastId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

mod evaluator;

/// Oracle answering from a table keyed by file name; anything else is `Unknown`
struct FakeOracle {
    states: HashMap<String, PlayState>,
    lookups: AtomicUsize,
}

impl FakeOracle {
    fn new(states: &[(&str, PlayState)]) -> Self {
        Self {
            states: states
                .iter()
                .map(|(name, state)| (name.to_string(), *state))
                .collect(),
            lookups: AtomicUsize::new(0),
        }
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlayStateOracle for FakeOracle {
    async fn play_state(&self, path: &Path) -> PlayState {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| self.states.get(n).copied())
            .unwrap_or(PlayState::Unknown)
    }
}

/// Candidate `n` with file `ep-{n}.mp3`; callers pass them newest first
fn candidate(n: i64) -> RetentionCandidate {
    RetentionCandidate {
        id: DownloadId(n),
        episode_id: EpisodeId(n),
        title: format!("Episode {}", n),
        published_at: Some(1_704_067_200 + n * 86_400),
        file_path: Some(format!("/media/show/ep-{}.mp3", n)),
        size_bytes: Some(1000),
    }
}

/// One podcast with `days` completed downloads published 2024-01-01, -02, ...
///
/// Returns download ids oldest first.
async fn completed_podcast(
    engine: &DownloadEngine,
    retention: i64,
    days: usize,
) -> (PodcastId, Vec<DownloadId>) {
    let podcast_id = seed_podcast(&engine.db, "https://example.com/feed.xml").await;
    engine
        .db
        .update_podcast_settings(podcast_id, Some(retention), None)
        .await
        .unwrap();

    let mut ids = Vec::with_capacity(days);
    for day in 0..days {
        let episode_id = seed_episode(
            &engine.db,
            podcast_id,
            &format!("ep-{}", day),
            1_704_067_200 + day as i64 * 86_400,
        )
        .await;
        ids.push(engine.enqueue(episode_id).await.unwrap().id);
    }

    let report = engine.drain_queue(days).await.unwrap();
    assert_eq!(report.completed, days);
    (podcast_id, ids)
}

//! Scripted feed source for discovery tests.

use super::feed::{FeedEpisode, FeedSource, ParsedFeed};
use crate::error::FeedError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Feed source that serves whatever the test put in it
pub(crate) struct FakeFeedSource {
    feeds: Mutex<HashMap<String, std::result::Result<ParsedFeed, String>>>,
    fetches: AtomicUsize,
}

impl FakeFeedSource {
    pub(crate) fn new() -> Self {
        Self {
            feeds: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set_feed(&self, url: &str, feed: ParsedFeed) {
        self.feeds.lock().unwrap().insert(url.to_string(), Ok(feed));
    }

    /// Make every fetch of `url` fail with a network error
    pub(crate) fn set_unreachable(&self, url: &str, reason: &str) {
        self.feeds
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(reason.to_string()));
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedSource for FakeFeedSource {
    async fn fetch_feed(&self, url: &str) -> std::result::Result<ParsedFeed, FeedError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.feeds.lock().unwrap().get(url).cloned() {
            Some(Ok(feed)) => Ok(feed),
            Some(Err(reason)) => Err(FeedError::Network {
                url: url.to_string(),
                reason,
            }),
            None => Err(FeedError::Network {
                url: url.to_string(),
                reason: "HTTP 404".to_string(),
            }),
        }
    }
}

/// Feed entry published `day` days after 2024-01-01
pub(crate) fn feed_episode(guid: &str, day: i64) -> FeedEpisode {
    FeedEpisode {
        guid: guid.to_string(),
        title: format!("Episode {}", guid),
        audio_url: format!("https://cdn.example.com/{}.mp3", guid),
        published_at: DateTime::<Utc>::from_timestamp(1_704_067_200 + day * 86_400, 0),
        description: Some(format!("Notes for {}", guid)),
        file_size: Some(4096),
    }
}

pub(crate) fn parsed_feed(title: &str, episodes: Vec<FeedEpisode>) -> ParsedFeed {
    ParsedFeed {
        title: title.to_string(),
        description: None,
        episodes,
    }
}

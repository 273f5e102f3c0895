//! Feed source: fetches a podcast feed and turns it into plain records.
//!
//! RSS 2.0 is tried first and Atom second, the same order most podcast hosts
//! make likely. Items without a playable enclosure are skipped.

use crate::error::{Error, FeedError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

const MAX_TITLE_LEN: usize = 500;
const MAX_GUID_LEN: usize = 500;
const MAX_DESCRIPTION_LEN: usize = 10_000;

#[allow(clippy::expect_used)]
static TAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("static regex is valid"));

#[allow(clippy::expect_used)]
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static regex is valid"));

/// One episode as advertised by a feed
#[derive(Clone, Debug, PartialEq)]
pub struct FeedEpisode {
    /// Identifier, unique within the feed (guid, then link, then audio URL)
    pub guid: String,
    /// Episode title
    pub title: String,
    /// Enclosure URL
    pub audio_url: String,
    /// Publication time
    pub published_at: Option<DateTime<Utc>>,
    /// Plain-text description
    pub description: Option<String>,
    /// Enclosure length, when the feed states one
    pub file_size: Option<u64>,
}

/// A fetched feed
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedFeed {
    /// Podcast title
    pub title: String,
    /// Plain-text podcast description
    pub description: Option<String>,
    /// Episodes in feed order
    pub episodes: Vec<FeedEpisode>,
}

/// Where discovery gets feeds from
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch and parse the feed at `url`
    async fn fetch_feed(&self, url: &str) -> std::result::Result<ParsedFeed, FeedError>;
}

/// Feed source backed by reqwest
#[derive(Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
}

impl HttpFeedSource {
    /// Create a feed source with a per-request timeout
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch_feed(&self, url: &str) -> std::result::Result<ParsedFeed, FeedError> {
        debug!(url, "Fetching feed");

        let network = |reason: String| FeedError::Network {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(network(format!("HTTP {}", status.as_u16())));
        }

        let content = response
            .bytes()
            .await
            .map_err(|e| network(format!("failed to read body: {}", e)))?;

        parse_feed(url, &content)
    }
}

/// Parse feed bytes as RSS, falling back to Atom
pub fn parse_feed(url: &str, content: &[u8]) -> std::result::Result<ParsedFeed, FeedError> {
    match parse_as_rss(content) {
        Ok(feed) => {
            debug!(url, episodes = feed.episodes.len(), "Parsed feed as RSS");
            Ok(feed)
        }
        Err(rss_err) => {
            debug!(url, error = %rss_err, "Not RSS, trying Atom");
            match parse_as_atom(content) {
                Ok(feed) => {
                    debug!(url, episodes = feed.episodes.len(), "Parsed feed as Atom");
                    Ok(feed)
                }
                Err(atom_err) => Err(FeedError::Parse {
                    url: url.to_string(),
                    reason: format!("RSS error: {}. Atom error: {}", rss_err, atom_err),
                }),
            }
        }
    }
}

fn parse_as_rss(content: &[u8]) -> std::result::Result<ParsedFeed, rss::Error> {
    let channel = rss::Channel::read_from(content)?;

    let episodes = channel
        .items()
        .iter()
        .filter_map(|item| {
            let title = item.title().unwrap_or("Untitled Episode");
            let Some(enclosure) = item.enclosure().filter(|e| is_media(e.mime_type())) else {
                debug!(title, "Item has no audio enclosure, skipping");
                return None;
            };
            let audio_url = enclosure.url().trim();
            if audio_url.is_empty() {
                return None;
            }

            let guid = item
                .guid()
                .map(|g| g.value().trim())
                .filter(|g| !g.is_empty())
                .or_else(|| item.link())
                .unwrap_or(audio_url);

            Some(FeedEpisode {
                guid: truncate(guid.trim(), MAX_GUID_LEN),
                title: truncate(title.trim(), MAX_TITLE_LEN),
                audio_url: audio_url.to_string(),
                published_at: item.pub_date().and_then(parse_date),
                description: item
                    .description()
                    .and_then(|d| plain_text(d, MAX_DESCRIPTION_LEN)),
                file_size: enclosure.length().trim().parse::<u64>().ok().filter(|n| *n > 0),
            })
        })
        .collect();

    Ok(ParsedFeed {
        title: channel.title().trim().to_string(),
        description: plain_text(channel.description(), MAX_DESCRIPTION_LEN),
        episodes,
    })
}

fn parse_as_atom(content: &[u8]) -> std::result::Result<ParsedFeed, atom_syndication::Error> {
    let feed = atom_syndication::Feed::read_from(content)?;

    let episodes = feed
        .entries()
        .iter()
        .filter_map(|entry| {
            let title = entry.title().as_str();
            let Some(link) = entry.links().iter().find(|link| {
                link.rel() == "enclosure" || link.mime_type().is_some_and(|m| m.starts_with("audio/"))
            }) else {
                debug!(title, "Entry has no audio link, skipping");
                return None;
            };
            let audio_url = link.href().trim();
            if audio_url.is_empty() {
                return None;
            }

            let guid = Some(entry.id().trim())
                .filter(|id| !id.is_empty())
                .unwrap_or(audio_url);

            let published_at = entry
                .published()
                .unwrap_or_else(|| entry.updated())
                .with_timezone(&Utc);

            let description = entry
                .summary()
                .map(|s| s.as_str().to_string())
                .or_else(|| entry.content().and_then(|c| c.value().map(|v| v.to_string())))
                .and_then(|d| plain_text(&d, MAX_DESCRIPTION_LEN));

            Some(FeedEpisode {
                guid: truncate(guid, MAX_GUID_LEN),
                title: truncate(title.trim(), MAX_TITLE_LEN),
                audio_url: audio_url.to_string(),
                published_at: Some(published_at),
                description,
                file_size: link
                    .length()
                    .and_then(|l| l.trim().parse::<u64>().ok())
                    .filter(|n| *n > 0),
            })
        })
        .collect();

    Ok(ParsedFeed {
        title: feed.title().as_str().trim().to_string(),
        description: feed.subtitle().and_then(|s| plain_text(s.as_str(), MAX_DESCRIPTION_LEN)),
        episodes,
    })
}

/// Enclosures with no type are accepted; typed ones must be audio or video
fn is_media(mime_type: &str) -> bool {
    let mime_type = mime_type.trim();
    mime_type.is_empty() || mime_type.starts_with("audio/") || mime_type.starts_with("video/")
}

/// RFC 2822 first (RSS), then RFC 3339 for feeds that get it wrong
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Strip markup and collapse whitespace; empty text becomes `None`
fn plain_text(html: &str, max_len: usize) -> Option<String> {
    let stripped = TAGS.replace_all(html, " ");
    let collapsed = WHITESPACE.replace_all(&stripped, " ");
    let text = collapsed.trim();
    (!text.is_empty()).then(|| truncate(text, max_len))
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

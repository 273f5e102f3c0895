//! Play-state oracle: asks a media server whether a file has been played.

use crate::config::PlexConfig;
use crate::error::{Error, Result};
use crate::types::PlayState;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Best-effort play-state lookup
///
/// Implementations never fail: anything they cannot determine is `Unknown`,
/// which retention treats as "keep".
#[async_trait]
pub trait PlayStateOracle: Send + Sync {
    /// Play state of the file at `path`
    async fn play_state(&self, path: &Path) -> PlayState;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "MediaContainer")]
    media_container: T,
}

#[derive(Debug, Default, Deserialize)]
struct Sections {
    #[serde(rename = "Directory", default)]
    directories: Vec<Section>,
}

#[derive(Debug, Deserialize)]
struct Section {
    key: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Default, Deserialize)]
struct Items {
    #[serde(rename = "Metadata", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    #[serde(rename = "viewCount", default)]
    view_count: u64,
    #[serde(rename = "Media", default)]
    media: Vec<Media>,
}

#[derive(Debug, Deserialize)]
struct Media {
    #[serde(rename = "Part", default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    file: String,
}

impl Item {
    fn has_file_named(&self, name: &str) -> bool {
        self.media
            .iter()
            .flat_map(|m| &m.parts)
            .any(|p| Path::new(&p.file).file_name().is_some_and(|f| f == name))
    }
}

/// Plex Media Server oracle
///
/// Searches the configured library section by file stem and keeps only hits
/// whose media part has our file name. Such a hit with `viewCount > 0` is
/// `Played`, one without plays is `Unplayed`, and no hit on our file or any
/// request failure is `Unknown`.
pub struct PlexOracle {
    client: reqwest::Client,
    base_url: String,
    token: String,
    library: String,
    section_key: OnceCell<String>,
}

impl PlexOracle {
    /// Create an oracle for the configured server
    ///
    /// No request is made until the first lookup.
    pub fn new(config: &PlexConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            library: config.library.clone(),
            section_key: OnceCell::new(),
        })
    }

    /// Check that the server answers and the library section exists
    ///
    /// # Errors
    /// Returns `OracleUnavailable` describing what failed.
    pub async fn test_connection(&self) -> Result<()> {
        let key = self.section_key().await?;
        info!(library = %self.library, section = %key, "Plex connection test successful");
        Ok(())
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path_and_query: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let response = self
            .client
            .get(&url)
            .header("X-Plex-Token", &self.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::OracleUnavailable(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::OracleUnavailable(format!(
                "Plex returned HTTP {}",
                status.as_u16()
            )));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| Error::OracleUnavailable(format!("unexpected response: {}", e)))?;
        Ok(envelope.media_container)
    }

    /// Key of the configured library section, looked up once
    async fn section_key(&self) -> Result<&String> {
        self.section_key
            .get_or_try_init(|| async {
                let sections: Sections = self.get("/library/sections").await?;
                sections
                    .directories
                    .into_iter()
                    .find(|s| s.title == self.library)
                    .map(|s| s.key)
                    .ok_or_else(|| {
                        Error::OracleUnavailable(format!(
                            "library section '{}' not found",
                            self.library
                        ))
                    })
            })
            .await
    }

    async fn lookup(&self, path: &Path) -> Result<PlayState> {
        let (Some(stem), Some(name)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.file_name().and_then(|s| s.to_str()),
        ) else {
            return Ok(PlayState::Unknown);
        };

        let key = self.section_key().await?;
        let items: Items = self
            .get(&format!(
                "/library/sections/{}/all?title={}",
                urlencoding::encode(key),
                urlencoding::encode(stem)
            ))
            .await?;

        // Title search is fuzzy; only a hit on our own file counts
        let matched = items.items.iter().find(|item| item.has_file_named(name));

        Ok(match matched {
            Some(item) if item.view_count > 0 => PlayState::Played,
            Some(_) => PlayState::Unplayed,
            None => {
                debug!(file = name, hits = items.items.len(), "Episode file not found in Plex");
                PlayState::Unknown
            }
        })
    }
}

#[async_trait]
impl PlayStateOracle for PlexOracle {
    async fn play_state(&self, path: &Path) -> PlayState {
        match self.lookup(path).await {
            Ok(state) => {
                debug!(path = %path.display(), ?state, "Plex play state");
                state
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Plex lookup failed, treating as unknown");
                PlayState::Unknown
            }
        }
    }
}

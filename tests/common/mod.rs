//! Common test utilities for podkeep integration tests

use podkeep::{Config, DownloadStatus, Podkeep};
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Size of every audio fixture
pub const AUDIO_SIZE: usize = 16 * 1024;

/// One `<item>` of a fixture feed
pub struct FixtureEpisode {
    pub guid: &'static str,
    pub title: &'static str,
    pub pub_date: &'static str,
}

/// Three episodes, newest first: Jan 3, Jan 2, Jan 1 2024
pub fn three_episodes() -> Vec<FixtureEpisode> {
    vec![
        FixtureEpisode {
            guid: "ep-3",
            title: "Third",
            pub_date: "Wed, 03 Jan 2024 06:00:00 +0000",
        },
        FixtureEpisode {
            guid: "ep-2",
            title: "Second",
            pub_date: "Tue, 02 Jan 2024 06:00:00 +0000",
        },
        FixtureEpisode {
            guid: "ep-1",
            title: "First",
            pub_date: "Mon, 01 Jan 2024 06:00:00 +0000",
        },
    ]
}

/// RSS document whose enclosures point at `{base}/audio/{guid}.mp3`
pub fn rss_feed(base: &str, title: &str, episodes: &[FixtureEpisode]) -> String {
    let items: String = episodes
        .iter()
        .map(|ep| {
            format!(
                r#"<item>
    <title>{title}</title>
    <guid isPermaLink="false">{guid}</guid>
    <pubDate>{date}</pubDate>
    <description>&lt;p&gt;Notes for {title}&lt;/p&gt;</description>
    <enclosure url="{base}/audio/{guid}.mp3" length="{size}" type="audio/mpeg"/>
</item>"#,
                title = ep.title,
                guid = ep.guid,
                date = ep.pub_date,
                base = base,
                size = AUDIO_SIZE,
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
<channel>
    <title>{}</title>
    <link>{}</link>
    <description>Integration test feed</description>
    {}
</channel>
</rss>"#,
        title, base, items
    )
}

/// Serve the feed at `/feed.xml` and every episode's audio
pub async fn mount_feed(server: &MockServer, title: &str, episodes: &[FixtureEpisode]) {
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/rss+xml")
                .set_body_string(rss_feed(&server.uri(), title, episodes)),
        )
        .mount(server)
        .await;

    for ep in episodes {
        Mock::given(method("GET"))
            .and(path(format!("/audio/{}.mp3", ep.guid)))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "audio/mpeg")
                    .set_body_bytes(vec![0xA5u8; AUDIO_SIZE]),
            )
            .mount(server)
            .await;
    }
}

/// Config rooted in `dir` with immediate retries and no disk space check
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.database_path = dir.join("podkeep.db");
    config.storage.download_dir = dir.join("downloads");
    config.disk_space.enabled = false;
    config.retry.initial_delay = Duration::ZERO;
    config.retry.max_delay = Duration::ZERO;
    config.retry.jitter = false;
    config.feed.request_timeout = Duration::from_secs(5);
    config.shutdown_grace = Duration::from_secs(5);
    config
}

/// Poll until `count` downloads have `status`, failing after five seconds
pub async fn wait_for_status(podkeep: &Podkeep, status: DownloadStatus, count: usize) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let n = podkeep.list_downloads(Some(status)).await.unwrap().len();
            if n >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {} {} downloads", count, status);
}

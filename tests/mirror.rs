//! End-to-end mirror tests against a local HTTP server.
//!
//! Feeds and audio are served by wiremock; everything else (SQLite, the
//! download root, the scheduler) is real.

mod common;

use common::{AUDIO_SIZE, FixtureEpisode, mount_feed, test_config, three_episodes, wait_for_status};
use podkeep::config::PlexConfig;
use podkeep::{DownloadStatus, Event, Podkeep, SubscribeOptions};
use std::collections::HashMap;
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SHOW: &str = "Integration Show";
const FOLDER: &str = "Integration-Show";

fn options(retention: u32, auto_download: bool) -> SubscribeOptions {
    SubscribeOptions {
        retention,
        auto_download,
    }
}

/// Download status keyed by episode guid
async fn status_by_guid(podkeep: &Podkeep, podcast_id: podkeep::PodcastId) -> HashMap<String, DownloadStatus> {
    let episodes = podkeep.list_episodes(podcast_id).await.unwrap();
    let downloads = podkeep.list_downloads(None).await.unwrap();

    episodes
        .into_iter()
        .filter_map(|ep| {
            downloads
                .iter()
                .find(|d| d.episode_id == ep.id)
                .map(|d| (ep.guid, d.status()))
        })
        .collect()
}

#[tokio::test]
async fn subscribe_drain_cleanup_end_to_end() {
    let server = MockServer::start().await;
    mount_feed(&server, SHOW, &three_episodes()).await;
    let temp = tempfile::tempdir().unwrap();
    let podkeep = Podkeep::new(test_config(temp.path())).await.unwrap();

    let podcast = podkeep
        .subscribe(&format!("{}/feed.xml", server.uri()), options(2, true))
        .await
        .unwrap();
    assert_eq!(podcast.title, SHOW);
    assert_eq!(podcast.folder, FOLDER);
    assert!(podcast.last_checked.is_some());

    let episodes = podkeep.list_episodes(podcast.id).await.unwrap();
    assert_eq!(episodes.len(), 3);
    assert_eq!(episodes[0].guid, "ep-3", "newest first");
    assert_eq!(episodes[0].description.as_deref(), Some("Notes for Third"));

    let pending = podkeep.list_downloads(Some(DownloadStatus::Pending)).await.unwrap();
    assert_eq!(pending.len(), 3);

    let report = podkeep.engine().drain_queue(10).await.unwrap();
    assert_eq!(report.claimed, 3);
    assert_eq!(report.completed, 3);

    let show_dir = temp.path().join("downloads").join(FOLDER);
    for name in ["2024-01-01-first.mp3", "2024-01-02-second.mp3", "2024-01-03-third.mp3"] {
        let file = show_dir.join(name);
        assert!(file.is_file(), "missing {}", file.display());
        assert_eq!(std::fs::metadata(&file).unwrap().len(), AUDIO_SIZE as u64);
    }

    let summary = podkeep.cleanup_all().await.unwrap();
    assert_eq!(summary.podcasts, 1);
    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.bytes_freed, AUDIO_SIZE as u64);

    assert!(!show_dir.join("2024-01-01-first.mp3").exists());
    assert!(show_dir.join("2024-01-02-second.mp3").exists());
    assert!(show_dir.join("2024-01-03-third.mp3").exists());

    let statuses = status_by_guid(&podkeep, podcast.id).await;
    assert_eq!(statuses["ep-1"], DownloadStatus::Deleted);
    assert_eq!(statuses["ep-2"], DownloadStatus::Completed);
    assert_eq!(statuses["ep-3"], DownloadStatus::Completed);

    // A second pass has nothing left to do
    let again = podkeep.cleanup_all().await.unwrap();
    assert_eq!(again.deleted, 0);

    podkeep.shutdown().await.unwrap();
}

#[tokio::test]
async fn new_episode_is_picked_up_on_rediscovery() {
    let server = MockServer::start().await;
    let mut episodes = three_episodes();
    episodes.remove(0);
    mount_feed(&server, SHOW, &episodes).await;

    let temp = tempfile::tempdir().unwrap();
    let podkeep = Podkeep::new(test_config(temp.path())).await.unwrap();
    let podcast = podkeep
        .subscribe(&format!("{}/feed.xml", server.uri()), options(5, true))
        .await
        .unwrap();
    podkeep.engine().drain_queue(10).await.unwrap();
    wait_for_status(&podkeep, DownloadStatus::Completed, 2).await;

    // The feed gains an episode
    server.reset().await;
    mount_feed(&server, SHOW, &three_episodes()).await;

    let report = podkeep.discover_podcast(podcast.id).await.unwrap();
    assert_eq!(report.new_episodes, 1);
    assert_eq!(report.existing, 2);
    assert_eq!(report.queued, 1);

    podkeep.engine().drain_queue(10).await.unwrap();
    wait_for_status(&podkeep, DownloadStatus::Completed, 3).await;

    podkeep.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_download_is_recovered_by_retry_failed() {
    let server = MockServer::start().await;
    let episodes = vec![FixtureEpisode {
        guid: "late",
        title: "Late Upload",
        pub_date: "Fri, 05 Jan 2024 06:00:00 +0000",
    }];

    // Feed only; the audio answers 404 until it is mounted below
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(common::rss_feed(&server.uri(), SHOW, &episodes)),
        )
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.retry.max_attempts = 2;
    let podkeep = Podkeep::new(config).await.unwrap();
    podkeep
        .subscribe(&format!("{}/feed.xml", server.uri()), options(3, true))
        .await
        .unwrap();

    let first = podkeep.engine().drain_queue(10).await.unwrap();
    assert_eq!(first.retrying, 1);
    let second = podkeep.engine().drain_queue(10).await.unwrap();
    assert_eq!(second.failed, 1);

    let failed = podkeep.list_downloads(Some(DownloadStatus::Failed)).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 2);
    assert!(failed[0].last_error.as_deref().unwrap().contains("404"));

    Mock::given(method("GET"))
        .and(path("/audio/late.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 512]))
        .mount(&server)
        .await;

    let retried = podkeep.retry_failed().await.unwrap();
    assert_eq!(retried, vec![failed[0].id]);

    let report = podkeep.engine().drain_queue(10).await.unwrap();
    assert_eq!(report.completed, 1);

    let task = podkeep.get_download(failed[0].id).await.unwrap();
    assert_eq!(task.status(), DownloadStatus::Completed);
    assert_eq!(task.size_bytes, Some(512));

    podkeep.shutdown().await.unwrap();
}

#[tokio::test]
async fn plex_keeps_unplayed_episodes_past_retention() {
    let server = MockServer::start().await;
    mount_feed(&server, SHOW, &three_episodes()).await;

    let plex = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/library/sections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "MediaContainer": { "Directory": [{ "key": "4", "title": "Podcasts" }] }
        })))
        .mount(&plex)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/library/sections/4/all$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "MediaContainer": {
                "Metadata": [{
                    "viewCount": 0,
                    "Media": [{ "Part": [{ "file": "/media/Integration-Show/2024-01-01-first.mp3" }] }]
                }]
            }
        })))
        .mount(&plex)
        .await;

    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.plex = Some(PlexConfig {
        url: plex.uri(),
        token: "secret".to_string(),
        library: "Podcasts".to_string(),
        timeout: Duration::from_secs(5),
    });
    let podkeep = Podkeep::new(config).await.unwrap();

    let podcast = podkeep
        .subscribe(&format!("{}/feed.xml", server.uri()), options(2, true))
        .await
        .unwrap();
    podkeep.engine().drain_queue(10).await.unwrap();

    let summary = podkeep.cleanup_podcast(podcast.id).await.unwrap();
    assert_eq!(summary.deleted, 0);
    assert_eq!(summary.kept_unplayed, 1);

    let file = temp.path().join("downloads").join(FOLDER).join("2024-01-01-first.mp3");
    assert!(file.exists());

    podkeep.shutdown().await.unwrap();
}

#[tokio::test]
async fn scheduled_jobs_mirror_a_subscription() {
    let server = MockServer::start().await;
    mount_feed(&server, SHOW, &three_episodes()).await;

    let temp = tempfile::tempdir().unwrap();
    let mut config = test_config(temp.path());
    config.jobs.drain.interval = Duration::from_millis(100);
    config.jobs.drain.run_on_start = true;
    let podkeep = Podkeep::new(config).await.unwrap();
    let mut events = podkeep.subscribe_events();

    podkeep
        .subscribe(&format!("{}/feed.xml", server.uri()), options(3, true))
        .await
        .unwrap();

    podkeep.start().await;

    let mut completed = 0;
    let mut drain_runs = 0;
    let observed = tokio::time::timeout(Duration::from_secs(5), async {
        while completed < 3 || drain_runs == 0 {
            match events.recv().await {
                Ok(Event::Completed { .. }) => completed += 1,
                Ok(Event::JobFinished { job_id, .. }) if job_id == "drain" => drain_runs += 1,
                Ok(_) => {}
                Err(e) => panic!("event stream closed: {}", e),
            }
        }
    })
    .await;
    assert!(observed.is_ok(), "saw {} completions, {} drain runs", completed, drain_runs);
    wait_for_status(&podkeep, DownloadStatus::Completed, 3).await;

    podkeep.shutdown().await.unwrap();
    assert!(podkeep.engine().is_shutting_down());
}

#[tokio::test]
async fn unsubscribe_removes_files_and_folder() {
    let server = MockServer::start().await;
    mount_feed(&server, SHOW, &three_episodes()).await;

    let temp = tempfile::tempdir().unwrap();
    let podkeep = Podkeep::new(test_config(temp.path())).await.unwrap();
    let podcast = podkeep
        .subscribe(&format!("{}/feed.xml", server.uri()), options(3, true))
        .await
        .unwrap();
    podkeep.engine().drain_queue(10).await.unwrap();

    let show_dir = temp.path().join("downloads").join(FOLDER);
    assert!(show_dir.is_dir());

    let removed = podkeep.unsubscribe(podcast.id, true).await.unwrap();
    assert_eq!(removed, 3);
    assert!(!show_dir.exists());
    assert!(podkeep.list_podcasts().await.unwrap().is_empty());

    let remaining = walkdir::WalkDir::new(temp.path().join("downloads"))
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count();
    assert_eq!(remaining, 0);

    podkeep.shutdown().await.unwrap();
}

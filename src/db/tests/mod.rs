use crate::db::*;
use crate::types::PodcastId;
use tempfile::NamedTempFile;


/// Open a fresh database in a temp file; keep the file alive for the test's duration
async fn open_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

async fn insert_test_podcast(db: &Database, feed_url: &str) -> PodcastId {
    db.insert_podcast(&NewPodcast {
        feed_url: feed_url.to_string(),
        title: "Test Podcast".to_string(),
        folder: "Test-Podcast".to_string(),
        retention: 3,
        auto_download: true,
    })
    .await
    .unwrap()
}

fn test_episode(podcast_id: PodcastId, guid: &str, published_at: Option<i64>) -> NewEpisode {
    NewEpisode {
        podcast_id,
        guid: guid.to_string(),
        title: format!("Episode {}", guid),
        description: Some("An episode".to_string()),
        audio_url: format!("https://cdn.example.com/{}.mp3", guid),
        published_at,
        file_size: Some(1024),
    }
}

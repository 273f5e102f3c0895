//! Podcast mirror daemon example
//!
//! This example runs podkeep as a long-lived process:
//! - Loading configuration from a JSON file (optional)
//! - Subscribing to feeds given on the command line
//! - Printing events as they happen
//! - Shutting down cleanly on SIGINT/SIGTERM
//!
//! ```text
//! RUST_LOG=podkeep=debug PODKEEP_CONFIG=podkeep.json \
//!     cargo run --example podkeep_daemon -- https://example.com/feed.xml
//! ```

use podkeep::{Config, Event, Podkeep, run_with_shutdown};
use tracing_subscriber::EnvFilter;

fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    match std::env::var("PODKEEP_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        Err(_) => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("podkeep=info")),
        )
        .init();

    let podkeep = Podkeep::new(load_config()?).await?;

    let mut events = podkeep.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::EpisodesDiscovered {
                    podcast_id,
                    new_episodes,
                } if new_episodes > 0 => {
                    println!("+ Podcast #{}: {} new episode(s)", podcast_id, new_episodes);
                }
                Event::Completed { id, path, .. } => {
                    println!("✓ Download #{} saved to {}", id, path.display());
                }
                Event::Failed { id, error, .. } => {
                    println!("✗ Download #{} failed: {}", id, error);
                }
                Event::Removed { id, .. } => {
                    println!("- Download #{} removed", id);
                }
                _ => {}
            }
        }
    });

    let options = podkeep.default_subscribe_options();
    for url in std::env::args().skip(1) {
        match podkeep.subscribe(&url, options.clone()).await {
            Ok(podcast) => println!("Subscribed to {} ({})", podcast.title, podcast.feed_url),
            Err(e) => eprintln!("Could not subscribe to {}: {}", url, e),
        }
    }

    for job in podkeep.list_jobs().await {
        println!(
            "Job {:<12} every {:>6}s{}",
            job.id,
            job.interval_secs,
            if job.paused { " (paused)" } else { "" }
        );
    }

    podkeep.start().await;
    run_with_shutdown(podkeep).await?;

    Ok(())
}

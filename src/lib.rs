//! # podkeep
//!
//! Library core of a podcast mirror: keeps a bounded local copy of podcast
//! episodes in sync with their feeds.
//!
//! ## Design Philosophy
//!
//! podkeep is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Sensible defaults** - Works out of the box with zero configuration
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Crash-safe** - All state lives in SQLite; interrupted downloads resume
//!
//! ## Components
//!
//! - [`scheduler`] - Named recurring jobs on independent timers
//! - [`downloader`] - Concurrency-limited download engine with retry/backoff
//! - [`discovery`] - Reconciles feeds with stored episodes
//! - [`retention`] - Decides which downloads to delete, optionally asking Plex
//! - [`Podkeep`] - Wires everything together and exposes the control surface
//!
//! ## Quick Start
//!
//! ```no_run
//! use podkeep::{Config, Podkeep, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let podkeep = Podkeep::new(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = podkeep.subscribe_events();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     podkeep.start().await;
//!     run_with_shutdown(podkeep).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Episode discovery
pub mod discovery;
/// Download engine (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Built-in job table
pub mod jobs;
/// Retention policy and cleanup
pub mod retention;
/// Retry logic with exponential backoff
pub mod retry;
/// Job scheduler
pub mod scheduler;
/// Composition root and control surface
pub mod service;
/// Filesystem layout of the download root
pub mod storage;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use discovery::{DiscoveryCoordinator, SubscribeOptions};
pub use downloader::DownloadEngine;
pub use error::{
    ApiError, DatabaseError, DownloadError, Error, ErrorDetail, ErrorKind, FeedError, JobError,
    Result, TransferError,
};
pub use retention::{PlayStateOracle, PlexOracle, Retention};
pub use scheduler::{JobAction, JobInfo, Scheduler};
pub use service::{Collaborators, Podkeep};
pub use types::{DownloadId, DownloadStatus, EpisodeId, Event, JobOutcome, PlayState, PodcastId};

/// Helper function to run podkeep with graceful signal handling.
///
/// Waits for a termination signal and then calls [`Podkeep::shutdown`], which
/// stops the scheduler and cancels in-flight downloads.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use podkeep::{Config, Podkeep, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let podkeep = Podkeep::new(Config::default()).await?;
///     podkeep.start().await;
///
///     // Run with automatic signal handling
///     run_with_shutdown(podkeep).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(podkeep: Podkeep) -> Result<()> {
    wait_for_signal().await;
    podkeep.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}

//! Configuration types for podkeep

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Filesystem locations
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory under which each podcast gets a folder (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// SQLite database path (default: "./podkeep.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            database_path: default_database_path(),
        }
    }
}

/// Download engine behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum concurrent transfers across all podcasts (default: 3, range 1-10)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Ceiling for a single transfer, after which it counts as a network failure (default: 1 hour)
    #[serde(default = "default_transfer_timeout", with = "duration_serde")]
    pub transfer_timeout: Duration,

    /// User-Agent sent with audio requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: default_max_concurrent(),
            transfer_timeout: default_transfer_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Retry configuration for failed transfers
///
/// Backoff is tracked per task: after the n-th failure the task becomes eligible
/// again after `initial_delay * backoff_multiplier^(n-1)`, capped at `max_delay`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts before a task is marked failed (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failure (default: 60 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 1 hour)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Disk space checking configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DiskSpaceConfig {
    /// Enable disk space checking (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Free space required when the content length is unknown (default: 100 MB)
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,
}

impl Default for DiskSpaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_free_space: default_min_free_space(),
        }
    }
}

/// Retention defaults
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Episodes kept per podcast when a subscription does not say otherwise (default: 3)
    #[serde(default = "default_keep")]
    pub default_keep: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_keep: default_keep(),
        }
    }
}

/// One recurring job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobConfig {
    /// Register the job at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Time between timer firings
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// Fire once as soon as the scheduler starts
    #[serde(default)]
    pub run_on_start: bool,
}

impl JobConfig {
    fn new(interval: Duration, run_on_start: bool) -> Self {
        Self {
            enabled: true,
            interval,
            run_on_start,
        }
    }
}

/// Intervals for the built-in jobs
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Feed discovery for every podcast (default: hourly, runs on start)
    #[serde(default = "default_discover_job")]
    pub discover: JobConfig,

    /// Queue drain (default: every 5 minutes, runs on start)
    #[serde(default = "default_drain_job")]
    pub drain: JobConfig,

    /// Retention cleanup (default: daily)
    #[serde(default = "default_cleanup_job")]
    pub cleanup: JobConfig,

    /// Re-queue failed downloads (default: disabled, every 6 hours)
    #[serde(default = "default_retry_failed_job")]
    pub retry_failed: JobConfig,

    /// Free-space report (default: hourly)
    #[serde(default = "default_disk_check_job")]
    pub disk_check: JobConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            discover: default_discover_job(),
            drain: default_drain_job(),
            cleanup: default_cleanup_job(),
            retry_failed: default_retry_failed_job(),
            disk_check: default_disk_check_job(),
        }
    }
}

/// Plex media server used as the play-state oracle
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlexConfig {
    /// Server base URL (e.g., "http://localhost:32400")
    pub url: String,

    /// X-Plex-Token
    pub token: String,

    /// Library section holding the podcast files (default: "Podcasts")
    #[serde(default = "default_plex_library")]
    pub library: String,

    /// Per-request timeout (default: 10 seconds)
    #[serde(default = "default_plex_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

/// Feed fetching
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_feed_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// User-Agent sent with feed requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_feed_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Main configuration for podkeep
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Filesystem locations
    #[serde(default)]
    pub storage: StorageConfig,

    /// Download engine behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Retry policy for failed transfers
    #[serde(default)]
    pub retry: RetryConfig,

    /// Disk space checks
    #[serde(default)]
    pub disk_space: DiskSpaceConfig,

    /// Retention defaults
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Built-in job intervals
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Optional play-state oracle
    #[serde(default)]
    pub plex: Option<PlexConfig>,

    /// Feed fetching
    #[serde(default)]
    pub feed: FeedConfig,

    /// How long shutdown waits for in-flight work (default: 30 seconds)
    #[serde(default = "default_shutdown_grace", with = "duration_serde")]
    pub shutdown_grace: Duration,
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.storage.download_dir
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(1..=10).contains(&self.download.max_concurrent_downloads) {
            return Err(config_error(
                "max_concurrent_downloads must be between 1 and 10",
                "download.max_concurrent_downloads",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_error(
                "max_attempts must be at least 1",
                "retry.max_attempts",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(config_error(
                "backoff_multiplier must be at least 1.0",
                "retry.backoff_multiplier",
            ));
        }
        if !(1..=100).contains(&self.retention.default_keep) {
            return Err(config_error(
                "default_keep must be between 1 and 100",
                "retention.default_keep",
            ));
        }
        for (key, job) in [
            ("jobs.discover", &self.jobs.discover),
            ("jobs.drain", &self.jobs.drain),
            ("jobs.cleanup", &self.jobs.cleanup),
            ("jobs.retry_failed", &self.jobs.retry_failed),
            ("jobs.disk_check", &self.jobs.disk_check),
        ] {
            if job.interval.is_zero() {
                return Err(config_error("job interval must be non-zero", key));
            }
        }
        if let Some(plex) = &self.plex {
            url::Url::parse(&plex.url)
                .map_err(|e| config_error(format!("invalid Plex URL: {}", e), "plex.url"))?;
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>, key: &str) -> Error {
    Error::Config {
        message: message.into(),
        key: Some(key.to_string()),
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./podkeep.db")
}

fn default_max_concurrent() -> usize {
    3
}

fn default_transfer_timeout() -> Duration {
    Duration::from_secs(3600)
}

fn default_user_agent() -> String {
    format!("podkeep/{}", env!("CARGO_PKG_VERSION"))
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(3600)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_min_free_space() -> u64 {
    100 * 1024 * 1024
}

fn default_keep() -> u32 {
    3
}

fn default_discover_job() -> JobConfig {
    JobConfig::new(Duration::from_secs(3600), true)
}

fn default_drain_job() -> JobConfig {
    JobConfig::new(Duration::from_secs(300), true)
}

fn default_cleanup_job() -> JobConfig {
    JobConfig::new(Duration::from_secs(86400), false)
}

fn default_retry_failed_job() -> JobConfig {
    JobConfig {
        enabled: false,
        ..JobConfig::new(Duration::from_secs(6 * 3600), false)
    }
}

fn default_disk_check_job() -> JobConfig {
    JobConfig::new(Duration::from_secs(3600), false)
}

fn default_plex_library() -> String {
    "Podcasts".to_string()
}

fn default_plex_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_feed_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

// Duration serialization helpers
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

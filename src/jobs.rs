//! The built-in job table.
//!
//! Built once at startup from [`JobsConfig`](crate::config::JobsConfig) and
//! handed to [`Scheduler::register`]. Disabled jobs are registered paused, so
//! they stay listed and can still be triggered by hand.

use crate::config::{Config, JobConfig};
use crate::discovery::DiscoveryCoordinator;
use crate::downloader::DownloadEngine;
use crate::error::Result;
use crate::retention::Retention;
use crate::scheduler::{JobAction, Scheduler, job_fn};
use crate::utils;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Feed discovery for every podcast
pub const DISCOVER: &str = "discover";
/// One drain batch of the download queue
pub const DRAIN: &str = "drain";
/// Retention cleanup for every podcast
pub const CLEANUP: &str = "cleanup";
/// Re-queue failed downloads
pub const RETRY_FAILED: &str = "retry_failed";
/// Free-space report
pub const DISK_CHECK: &str = "disk_check";

const GIB: u64 = 1024 * 1024 * 1024;

/// One row of the job table
pub struct JobSpec {
    /// Job id
    pub id: &'static str,
    /// Interval, enabled flag and run-on-start flag
    pub config: JobConfig,
    /// What the job does
    pub action: Arc<dyn JobAction>,
}

/// How worrying the free space on the download volume is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiskSpaceLevel {
    /// 10 GiB or more
    Plenty,
    /// Under 10 GiB
    Low,
    /// Under 5 GiB
    Warning,
    /// Under 1 GiB; downloads are likely to fail
    Critical,
}

impl DiskSpaceLevel {
    /// Classify a free-space reading
    pub fn from_bytes(available: u64) -> Self {
        if available < GIB {
            DiskSpaceLevel::Critical
        } else if available < 5 * GIB {
            DiskSpaceLevel::Warning
        } else if available < 10 * GIB {
            DiskSpaceLevel::Low
        } else {
            DiskSpaceLevel::Plenty
        }
    }
}

/// Build the job table
pub fn job_table(
    config: &Config,
    engine: &DownloadEngine,
    discovery: &DiscoveryCoordinator,
    retention: &Retention,
) -> Vec<JobSpec> {
    let batch = config.download.max_concurrent_downloads;

    vec![
        JobSpec {
            id: DISCOVER,
            config: config.jobs.discover.clone(),
            action: {
                let discovery = discovery.clone();
                job_fn(move |cancel| {
                    let discovery = discovery.clone();
                    async move { discovery.discover_all(&cancel).await.map(|_| ()) }
                })
            },
        },
        JobSpec {
            id: DRAIN,
            config: config.jobs.drain.clone(),
            action: {
                let engine = engine.clone();
                job_fn(move |cancel| {
                    let engine = engine.clone();
                    async move {
                        engine
                            .drain_queue_with_cancel(batch, &cancel)
                            .await
                            .map(|_| ())
                    }
                })
            },
        },
        JobSpec {
            id: CLEANUP,
            config: config.jobs.cleanup.clone(),
            action: {
                let retention = retention.clone();
                job_fn(move |cancel| {
                    let retention = retention.clone();
                    async move { retention.cleanup_all(&cancel).await.map(|_| ()) }
                })
            },
        },
        JobSpec {
            id: RETRY_FAILED,
            config: config.jobs.retry_failed.clone(),
            action: {
                let engine = engine.clone();
                job_fn(move |_cancel| {
                    let engine = engine.clone();
                    async move {
                        let retried = engine.retry_failed().await?;
                        if retried.is_empty() {
                            debug!("No failed downloads to retry");
                        } else {
                            info!(count = retried.len(), "Retried failed downloads");
                        }
                        Ok(())
                    }
                })
            },
        },
        JobSpec {
            id: DISK_CHECK,
            config: config.jobs.disk_check.clone(),
            action: {
                let engine = engine.clone();
                job_fn(move |_cancel| {
                    let engine = engine.clone();
                    async move { check_disk_space(&engine).map(|_| ()) }
                })
            },
        },
    ]
}

/// Register every job; disabled ones are paused right after registration
pub async fn register_all(scheduler: &Scheduler, table: Vec<JobSpec>) -> Result<()> {
    for spec in table {
        scheduler
            .register(spec.id, spec.config.interval, spec.config.run_on_start, spec.action)
            .await?;
        if !spec.config.enabled {
            scheduler.pause(spec.id).await?;
            debug!(job_id = spec.id, "Job disabled in configuration, registered paused");
        }
    }
    Ok(())
}

/// Log free space on the download volume against the warning thresholds
pub fn check_disk_space(engine: &DownloadEngine) -> Result<DiskSpaceLevel> {
    let available = engine.files().free_space(engine.files().root())?;
    let level = DiskSpaceLevel::from_bytes(available);
    let free = utils::format_file_size(available);

    match level {
        DiskSpaceLevel::Critical => {
            error!(free = %free, "Less than 1 GB free space, downloads may fail")
        }
        DiskSpaceLevel::Warning => warn!(free = %free, "Less than 5 GB free space remaining"),
        DiskSpaceLevel::Low => info!(free = %free, "Less than 10 GB free space remaining"),
        DiskSpaceLevel::Plenty => info!(free = %free, "Available disk space"),
    }

    Ok(level)
}

//! Progress reporting for a single transfer attempt.
//!
//! A transfer pushes fractions into a [`ProgressReporter`]; the reporter keeps
//! only increases, broadcasts them as [`Event::Progress`], and hands them to a
//! persister task over a watch channel so database writes never block the
//! byte stream.

use crate::db::Database;
use crate::types::{DownloadId, Event};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Minimum increase between two reported values
const REPORT_STEP: f32 = 0.01;

/// Monotonic progress sink handed to a transfer
pub struct ProgressReporter {
    id: DownloadId,
    tx: watch::Sender<f32>,
    event_tx: broadcast::Sender<Event>,
}

impl ProgressReporter {
    /// Create a reporter starting at 0.0
    pub fn new(id: DownloadId, event_tx: broadcast::Sender<Event>) -> Self {
        let (tx, _rx) = watch::channel(0.0);
        Self { id, tx, event_tx }
    }

    /// Download this reporter belongs to
    pub fn id(&self) -> DownloadId {
        self.id
    }

    /// Report a new fraction
    ///
    /// Values are clamped to [0, 1]. Decreases and increases smaller than one
    /// percent are dropped, except that 1.0 is always delivered once. Returns
    /// whether the value was published.
    pub fn update(&self, fraction: f32) -> bool {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };

        let published = self.tx.send_if_modified(|current| {
            let reached_end = fraction >= 1.0 && *current < 1.0;
            if reached_end || fraction >= *current + REPORT_STEP {
                *current = fraction;
                true
            } else {
                false
            }
        });

        if published {
            self.event_tx
                .send(Event::Progress {
                    id: self.id,
                    fraction,
                })
                .ok();
        }
        published
    }

    /// Report progress from byte counts; unknown totals report nothing
    ///
    /// Stops just short of 1.0; completion is reported by the engine once the
    /// file is safely on disk.
    pub fn update_bytes(&self, written: u64, total: Option<u64>) {
        if let Some(total) = total.filter(|t| *t > 0) {
            let fraction = (written as f64 / total as f64).min(0.999) as f32;
            self.update(fraction);
        }
    }

    /// Last published value
    pub fn current(&self) -> f32 {
        *self.tx.borrow()
    }

    /// Subscribe to published values
    pub fn watch(&self) -> watch::Receiver<f32> {
        self.tx.subscribe()
    }
}

/// Spawn a task that writes published progress to the database
///
/// The task ends once the reporter is dropped; await the handle before writing
/// the final status so no stale progress lands afterwards.
pub(crate) fn spawn_persister(
    db: Arc<Database>,
    reporter: &ProgressReporter,
) -> tokio::task::JoinHandle<()> {
    let id = reporter.id();
    let mut rx = reporter.watch();

    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let fraction = *rx.borrow_and_update();
            if let Err(e) = db.update_progress(id, fraction).await {
                tracing::warn!(download_id = id.0, error = %e, "Failed to persist progress");
            }
        }
    })
}

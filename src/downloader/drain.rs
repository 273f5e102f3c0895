//! Drain pass: claim a bounded FIFO batch and run it to the end of this pass.

use crate::error::Result;
use crate::types::Event;
use serde::Serialize;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

use super::DownloadEngine;
use super::worker::AttemptOutcome;

/// What one drain pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Tasks claimed from the pending queue
    pub claimed: usize,
    /// Tasks that finished downloading
    pub completed: usize,
    /// Tasks returned to pending with a backoff deadline
    pub retrying: usize,
    /// Tasks that reached terminal `failed`
    pub failed: usize,
    /// Tasks cancelled by removal or shutdown
    pub interrupted: usize,
}

impl DrainReport {
    fn record(&mut self, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Completed => self.completed += 1,
            AttemptOutcome::Retrying => self.retrying += 1,
            AttemptOutcome::Failed => self.failed += 1,
            AttemptOutcome::Interrupted => self.interrupted += 1,
        }
    }
}

impl DownloadEngine {
    /// Run one drain pass
    ///
    /// Claims up to `max` eligible pending tasks (oldest-queued first, tasks in
    /// backoff skipped), marks them `downloading`, and runs them concurrently
    /// under the global concurrency cap. Returns once every task of this batch
    /// has finished its attempt; the rest of the queue waits for the next pass.
    pub async fn drain_queue(&self, max: usize) -> Result<DrainReport> {
        self.drain_queue_with_cancel(max, &CancellationToken::new())
            .await
    }

    /// Run one drain pass that stops early when `cancel` fires
    ///
    /// Cancelling interrupts every transfer of the batch; interrupted tasks go
    /// back to `pending` without consuming an attempt. The scheduler's drain
    /// job uses this so stopping the scheduler alone ends a running batch.
    pub async fn drain_queue_with_cancel(
        &self,
        max: usize,
        cancel: &CancellationToken,
    ) -> Result<DrainReport> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            tracing::debug!("Skipping drain, engine is shutting down");
            return Ok(DrainReport::default());
        }
        if cancel.is_cancelled() {
            tracing::debug!("Skipping drain, cancelled before claiming");
            return Ok(DrainReport::default());
        }

        let now = chrono::Utc::now().timestamp();
        let jobs = self.db.claim_pending(max, now).await?;
        if jobs.is_empty() {
            tracing::debug!("No pending downloads to drain");
            return Ok(DrainReport::default());
        }

        let mut report = DrainReport {
            claimed: jobs.len(),
            ..DrainReport::default()
        };
        tracing::info!(claimed = jobs.len(), max, "Draining download queue");

        // Register every claim before any worker runs so remove/shutdown can see it
        let mut batch = Vec::with_capacity(jobs.len());
        {
            let mut active = self.queue_state.active_downloads.lock().await;
            for job in jobs {
                let token = self.queue_state.shutdown.child_token();
                active.insert(job.id, token.clone());
                batch.push((job, token));
            }
        }

        let tokens: Vec<CancellationToken> = batch.iter().map(|(_, t)| t.clone()).collect();
        let mut handles = Vec::with_capacity(batch.len());
        for (job, token) in batch {
            let id = job.id;
            self.emit_event(Event::Started { id });

            let engine = self.clone();
            let handle = tokio::spawn(async move { engine.run_attempt(job, token).await });
            handles.push(async move { (id, handle.await) });
        }

        let all = futures::future::join_all(handles);
        tokio::pin!(all);
        let results = tokio::select! {
            results = &mut all => results,
            _ = cancel.cancelled() => {
                tracing::info!(in_flight = tokens.len(), "Drain cancelled, interrupting batch");
                for token in &tokens {
                    token.cancel();
                }
                all.await
            }
        };

        for (id, joined) in results {
            match joined {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    tracing::error!(download_id = id.0, error = %e, "Download worker panicked");
                    if let Err(e) = self.db.release_claim(id).await {
                        tracing::error!(download_id = id.0, error = %e, "Failed to release claim");
                    }
                    self.queue_state.active_downloads.lock().await.remove(&id);
                    report.interrupted += 1;
                }
            }
        }

        tracing::info!(
            completed = report.completed,
            retrying = report.retrying,
            failed = report.failed,
            interrupted = report.interrupted,
            "Drain pass finished"
        );

        Ok(report)
    }
}

//! Job scheduler: named recurring jobs on independent timers.
//!
//! Each registered job has an interval, a pause flag and an action. Timers run
//! as independent tasks, so a slow job never delays another one. A job is never
//! run twice at the same time: a timer tick that finds the job still running is
//! skipped, and a manual [`Scheduler::trigger`] returns
//! [`JobError::AlreadyRunning`].
//!
//! Actions receive a [`CancellationToken`] that fires when the scheduler stops
//! and are expected to check it between logical steps. Errors and panics are
//! logged with the job id and recorded as the job's last outcome; the timer
//! keeps firing regardless.
//!
//! # Example
//!
//! ```no_run
//! use podkeep::scheduler::{Scheduler, job_fn};
//! use std::time::Duration;
//!
//! # async fn example() -> podkeep::Result<()> {
//! let (event_tx, _rx) = tokio::sync::broadcast::channel(100);
//! let scheduler = Scheduler::new(event_tx, Duration::from_secs(30));
//!
//! scheduler
//!     .register(
//!         "heartbeat",
//!         Duration::from_secs(60),
//!         true,
//!         job_fn(|_cancel| async {
//!             tracing::info!("still alive");
//!             Ok(())
//!         }),
//!     )
//!     .await?;
//!
//! scheduler.start().await;
//! // ...
//! scheduler.stop().await;
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, ErrorKind, JobError, Result};
use crate::types::{Event, JobOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Work performed by a job
#[async_trait]
pub trait JobAction: Send + Sync {
    /// Run once; return early when `cancel` fires
    async fn run(&self, cancel: CancellationToken) -> Result<()>;
}

/// Adapter turning a closure into a [`JobAction`]
pub struct FnJob<F>(F);

#[async_trait]
impl<F, Fut> JobAction for FnJob<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        (self.0)(cancel).await
    }
}

/// Wrap a closure returning a future as a job action
pub fn job_fn<F, Fut>(f: F) -> Arc<dyn JobAction>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnJob(f))
}

/// Snapshot of one job, as returned by [`Scheduler::list`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInfo {
    /// Job id
    pub id: String,
    /// Interval between timer firings, in seconds
    pub interval_secs: u64,
    /// Whether the timer is paused
    pub paused: bool,
    /// Whether a run is in progress
    pub running: bool,
    /// Whether the job fires as soon as the scheduler starts
    pub run_on_start: bool,
    /// Start time of the last run
    pub last_run: Option<DateTime<Utc>>,
    /// Next timer firing (None while paused or before start)
    pub next_run: Option<DateTime<Utc>>,
    /// Result of the last run
    pub last_outcome: JobOutcome,
}

struct JobEntry {
    interval: Duration,
    run_on_start: bool,
    action: Arc<dyn JobAction>,
    paused: bool,
    running: Arc<AtomicBool>,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    last_outcome: JobOutcome,
    timer: Option<CancellationToken>,
}

struct Inner {
    jobs: Mutex<HashMap<String, JobEntry>>,
    started: AtomicBool,
    stopping: AtomicBool,
    shutdown: CancellationToken,
    event_tx: broadcast::Sender<Event>,
    grace: Duration,
}

/// Runs registered jobs on independent timers (cloneable handle)
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a scheduler; `grace` bounds how long [`stop`](Self::stop) waits for running actions
    pub fn new(event_tx: broadcast::Sender<Event>, grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(HashMap::new()),
                started: AtomicBool::new(false),
                stopping: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                event_tx,
                grace,
            }),
        }
    }

    /// Register a job, or replace the interval and action of an existing one
    ///
    /// Re-registering keeps the job's pause state, last outcome and any run in
    /// progress. When the scheduler is already running, the job's timer is
    /// (re)armed immediately.
    pub async fn register(
        &self,
        id: &str,
        interval: Duration,
        run_on_start: bool,
        action: Arc<dyn JobAction>,
    ) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::Config {
                message: format!("job '{}' needs a non-zero interval", id),
                key: Some(format!("jobs.{}.interval", id)),
            });
        }

        let started = self.inner.started.load(Ordering::SeqCst);
        let mut jobs = self.inner.jobs.lock().await;

        match jobs.get_mut(id) {
            Some(entry) => {
                entry.interval = interval;
                entry.run_on_start = run_on_start;
                entry.action = action;
                if started && !entry.paused {
                    self.arm(id, entry, false);
                }
                debug!(job_id = id, interval_secs = interval.as_secs(), "Job re-registered");
            }
            None => {
                let mut entry = JobEntry {
                    interval,
                    run_on_start,
                    action,
                    paused: false,
                    running: Arc::new(AtomicBool::new(false)),
                    last_run: None,
                    next_run: None,
                    last_outcome: JobOutcome::Never,
                    timer: None,
                };
                if started {
                    self.arm(id, &mut entry, run_on_start);
                }
                jobs.insert(id.to_string(), entry);
                debug!(job_id = id, interval_secs = interval.as_secs(), "Job registered");
            }
        }

        Ok(())
    }

    /// Run a job now, out of band from its timer
    ///
    /// Returns once the run has been started; the timer schedule is unaffected.
    ///
    /// # Errors
    ///
    /// [`JobError::AlreadyRunning`] if a run is in progress (nothing is started),
    /// [`JobError::NotFound`] for an unknown id, [`Error::ShuttingDown`] after
    /// [`stop`](Self::stop).
    pub async fn trigger(&self, id: &str) -> Result<()> {
        let (action, running) = self.claim(id).await?;
        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        tokio::spawn(async move {
            execute(inner, id, action, running).await;
        });
        Ok(())
    }

    /// Run a job now and wait for it to finish
    ///
    /// Same coalescing rules as [`trigger`](Self::trigger).
    pub async fn run_now(&self, id: &str) -> Result<JobOutcome> {
        let (action, running) = self.claim(id).await?;
        Ok(execute(Arc::clone(&self.inner), id.to_string(), action, running).await)
    }

    /// Stop a job's timer; a run in progress is not interrupted
    pub async fn pause(&self, id: &str) -> Result<()> {
        let mut jobs = self.inner.jobs.lock().await;
        let entry = jobs.get_mut(id).ok_or_else(|| not_found(id))?;

        if !entry.paused {
            entry.paused = true;
            entry.next_run = None;
            if let Some(timer) = entry.timer.take() {
                timer.cancel();
            }
            info!(job_id = id, "Job paused");
        }
        Ok(())
    }

    /// Restart a paused job's timer; the next firing is one interval from now
    pub async fn resume(&self, id: &str) -> Result<()> {
        let started = self.inner.started.load(Ordering::SeqCst);
        let mut jobs = self.inner.jobs.lock().await;
        let entry = jobs.get_mut(id).ok_or_else(|| not_found(id))?;

        if entry.paused {
            entry.paused = false;
            if started {
                self.arm(id, entry, false);
            }
            info!(job_id = id, "Job resumed");
        }
        Ok(())
    }

    /// All registered jobs, sorted by id
    pub async fn list(&self) -> Vec<JobInfo> {
        let jobs = self.inner.jobs.lock().await;
        let mut infos: Vec<JobInfo> = jobs
            .iter()
            .map(|(id, entry)| JobInfo {
                id: id.clone(),
                interval_secs: entry.interval.as_secs(),
                paused: entry.paused,
                running: entry.running.load(Ordering::SeqCst),
                run_on_start: entry.run_on_start,
                last_run: entry.last_run,
                next_run: entry.next_run,
                last_outcome: entry.last_outcome.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Arm every unpaused timer and fire `run_on_start` jobs
    ///
    /// Calling it again has no effect.
    pub async fn start(&self) {
        if self.inner.stopping.load(Ordering::SeqCst)
            || self.inner.started.swap(true, Ordering::SeqCst)
        {
            return;
        }

        let mut jobs = self.inner.jobs.lock().await;
        for (id, entry) in jobs.iter_mut() {
            if !entry.paused {
                let fire_now = entry.run_on_start;
                self.arm(id, entry, fire_now);
            }
        }
        info!(jobs = jobs.len(), "Scheduler started");
    }

    /// Cancel all timers and running actions, then wait for the actions to return
    ///
    /// The wait is bounded by the grace period; actions still running after it
    /// are logged and left behind. The scheduler cannot be restarted.
    pub async fn stop(&self) {
        if self.inner.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Stopping scheduler");
        self.inner.shutdown.cancel();

        {
            let mut jobs = self.inner.jobs.lock().await;
            for entry in jobs.values_mut() {
                entry.timer = None;
                entry.next_run = None;
            }
        }

        let wait = async {
            loop {
                if self.running_jobs().await.is_empty() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };

        match tokio::time::timeout(self.inner.grace, wait).await {
            Ok(()) => info!("Scheduler stopped"),
            Err(_) => {
                let still_running = self.running_jobs().await;
                warn!(
                    jobs = ?still_running,
                    grace_secs = self.inner.grace.as_secs(),
                    "Jobs did not stop within the grace period"
                );
            }
        }
    }

    async fn running_jobs(&self) -> Vec<String> {
        let jobs = self.inner.jobs.lock().await;
        jobs.iter()
            .filter(|(_, entry)| entry.running.load(Ordering::SeqCst))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Set the running flag for a manual run
    async fn claim(&self, id: &str) -> Result<(Arc<dyn JobAction>, Arc<AtomicBool>)> {
        if self.inner.stopping.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let jobs = self.inner.jobs.lock().await;
        let entry = jobs.get(id).ok_or_else(|| not_found(id))?;

        if entry
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(job_id = id, "Trigger ignored, job already running");
            return Err(Error::Job(JobError::AlreadyRunning { id: id.to_string() }));
        }

        Ok((Arc::clone(&entry.action), Arc::clone(&entry.running)))
    }

    /// (Re)start the timer task for a job; the caller holds the jobs lock
    fn arm(&self, id: &str, entry: &mut JobEntry, fire_now: bool) {
        if let Some(old) = entry.timer.take() {
            old.cancel();
        }

        let token = self.inner.shutdown.child_token();
        entry.timer = Some(token.clone());
        entry.next_run = Some(if fire_now {
            Utc::now()
        } else {
            after(entry.interval)
        });

        tokio::spawn(timer_loop(
            Arc::clone(&self.inner),
            id.to_string(),
            entry.interval,
            fire_now,
            token,
        ));
    }
}

async fn timer_loop(
    inner: Arc<Inner>,
    id: String,
    interval: Duration,
    fire_now: bool,
    token: CancellationToken,
) {
    let mut skip_wait = fire_now;

    loop {
        if !skip_wait {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        skip_wait = false;

        if token.is_cancelled() {
            break;
        }

        let claimed = {
            let mut jobs = inner.jobs.lock().await;
            let Some(entry) = jobs.get_mut(&id) else {
                break;
            };
            entry.next_run = Some(after(interval));

            if entry
                .running
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                Some((Arc::clone(&entry.action), Arc::clone(&entry.running)))
            } else {
                None
            }
        };

        match claimed {
            Some((action, running)) => {
                tokio::spawn(execute(Arc::clone(&inner), id.clone(), action, running));
            }
            None => debug!(job_id = %id, "Previous run still in progress, skipping tick"),
        }
    }

    debug!(job_id = %id, "Job timer stopped");
}

/// Run an action whose running flag is already set, and record the outcome
async fn execute(
    inner: Arc<Inner>,
    id: String,
    action: Arc<dyn JobAction>,
    running: Arc<AtomicBool>,
) -> JobOutcome {
    let started_at = Utc::now();
    info!(job_id = %id, "Job started");
    inner.event_tx.send(Event::JobStarted { job_id: id.clone() }).ok();

    let cancel = inner.shutdown.child_token();
    // Separate task so a panicking action is contained
    let result = tokio::spawn(async move { action.run(cancel).await }).await;

    let outcome = match result {
        Ok(Ok(())) => {
            info!(job_id = %id, "Job finished");
            JobOutcome::Success
        }
        Ok(Err(e)) => {
            match e.kind() {
                ErrorKind::Conflict => debug!(job_id = %id, error = %e, "Job skipped"),
                ErrorKind::Unavailable => info!(job_id = %id, error = %e, "Job stopped early"),
                _ => error!(job_id = %id, error = %e, "Job failed"),
            }
            JobOutcome::Failed {
                error: e.to_string(),
            }
        }
        Err(e) => {
            error!(job_id = %id, error = %e, "Job panicked");
            JobOutcome::Failed {
                error: format!("job panicked: {}", e),
            }
        }
    };

    {
        let mut jobs = inner.jobs.lock().await;
        if let Some(entry) = jobs.get_mut(&id) {
            entry.last_run = Some(started_at);
            entry.last_outcome = outcome.clone();
        }
    }
    running.store(false, Ordering::SeqCst);

    inner
        .event_tx
        .send(Event::JobFinished {
            job_id: id,
            outcome: outcome.clone(),
        })
        .ok();

    outcome
}

fn after(interval: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(now)
}

fn not_found(id: &str) -> Error {
    Error::Job(JobError::NotFound { id: id.to_string() })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use super::*;
use std::sync::atomic::AtomicUsize;

fn scheduler() -> Scheduler {
    let (event_tx, _rx) = broadcast::channel(100);
    Scheduler::new(event_tx, Duration::from_secs(2))
}

/// Action that counts its runs and succeeds
fn counting(counter: Arc<AtomicUsize>) -> Arc<dyn JobAction> {
    job_fn(move |_cancel| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

/// Action that counts its runs and then blocks until `gate` or cancellation
fn gated(counter: Arc<AtomicUsize>, gate: CancellationToken) -> Arc<dyn JobAction> {
    job_fn(move |cancel| {
        let counter = Arc::clone(&counter);
        let gate = gate.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::select! {
                _ = gate.cancelled() => Ok(()),
                _ = cancel.cancelled() => Err(Error::Cancelled),
            }
        }
    })
}

async fn wait_until<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn info(scheduler: &Scheduler, id: &str) -> JobInfo {
    scheduler
        .list()
        .await
        .into_iter()
        .find(|j| j.id == id)
        .unwrap()
}

#[tokio::test]
async fn test_register_and_list() {
    let scheduler = scheduler();
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register("drain", Duration::from_secs(300), true, counting(counter.clone()))
        .await
        .unwrap();
    scheduler
        .register("cleanup", Duration::from_secs(86_400), false, counting(counter))
        .await
        .unwrap();

    let jobs = scheduler.list().await;
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].id, "cleanup");
    assert_eq!(jobs[1].id, "drain");
    assert_eq!(jobs[1].interval_secs, 300);
    assert!(jobs[1].run_on_start);
    assert!(!jobs[1].paused);
    assert!(jobs[1].next_run.is_none(), "not armed before start");
    assert_eq!(jobs[1].last_outcome, JobOutcome::Never);
}

#[tokio::test]
async fn test_zero_interval_is_rejected() {
    let scheduler = scheduler();
    let err = scheduler
        .register("bad", Duration::ZERO, false, counting(Arc::new(AtomicUsize::new(0))))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
}

#[tokio::test]
async fn test_run_now_records_outcome() {
    let scheduler = scheduler();
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register("discover", Duration::from_secs(3600), false, counting(counter.clone()))
        .await
        .unwrap();

    let outcome = scheduler.run_now("discover").await.unwrap();
    assert_eq!(outcome, JobOutcome::Success);
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let job = info(&scheduler, "discover").await;
    assert_eq!(job.last_outcome, JobOutcome::Success);
    assert!(job.last_run.is_some());
    assert!(!job.running);
}

#[tokio::test]
async fn test_duplicate_trigger_is_rejected_not_run() {
    let scheduler = scheduler();
    let counter = Arc::new(AtomicUsize::new(0));
    let gate = CancellationToken::new();
    scheduler
        .register("drain", Duration::from_secs(3600), false, gated(counter.clone(), gate.clone()))
        .await
        .unwrap();

    scheduler.trigger("drain").await.unwrap();
    wait_until(|| counter.load(Ordering::SeqCst) == 1).await;

    let err = scheduler.trigger("drain").await.unwrap_err();
    assert!(matches!(err, Error::Job(JobError::AlreadyRunning { ref id }) if id == "drain"));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(info(&scheduler, "drain").await.running);

    gate.cancel();
    let scheduler_ref = scheduler.clone();
    tokio::time::timeout(Duration::from_secs(2), async move {
        while info(&scheduler_ref, "drain").await.running {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 1);

    // Free again once the first run returned
    scheduler.trigger("drain").await.unwrap();
    wait_until(|| counter.load(Ordering::SeqCst) == 2).await;
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let scheduler = scheduler();

    for result in [
        scheduler.trigger("nope").await,
        scheduler.pause("nope").await,
        scheduler.resume("nope").await,
    ] {
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

#[tokio::test]
async fn test_failing_job_keeps_firing() {
    let scheduler = scheduler();
    let counter = Arc::new(AtomicUsize::new(0));
    let runs = counter.clone();
    scheduler
        .register(
            "flaky",
            Duration::from_millis(30),
            false,
            job_fn(move |_cancel| {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Other("feed host down".into()))
                }
            }),
        )
        .await
        .unwrap();

    scheduler.start().await;
    wait_until(|| counter.load(Ordering::SeqCst) >= 3).await;

    let job = info(&scheduler, "flaky").await;
    assert!(matches!(job.last_outcome, JobOutcome::Failed { ref error } if error.contains("feed host down")));
    assert!(!job.paused);

    scheduler.stop().await;
}

#[tokio::test]
async fn test_panicking_job_is_contained() {
    let scheduler = scheduler();
    let counter = Arc::new(AtomicUsize::new(0));
    let runs = counter.clone();
    scheduler
        .register(
            "boom",
            Duration::from_secs(3600),
            false,
            job_fn(move |_cancel| {
                let runs = runs.clone();
                async move {
                    if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                        panic!("first run explodes");
                    }
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();

    let outcome = scheduler.run_now("boom").await.unwrap();
    assert!(matches!(outcome, JobOutcome::Failed { ref error } if error.contains("panicked")));
    assert!(!info(&scheduler, "boom").await.running);

    let outcome = scheduler.run_now("boom").await.unwrap();
    assert_eq!(outcome, JobOutcome::Success);
}

#[tokio::test]
async fn test_run_on_start_fires_immediately() {
    let scheduler = scheduler();
    let eager = Arc::new(AtomicUsize::new(0));
    let lazy = Arc::new(AtomicUsize::new(0));
    scheduler
        .register("eager", Duration::from_secs(3600), true, counting(eager.clone()))
        .await
        .unwrap();
    scheduler
        .register("lazy", Duration::from_secs(3600), false, counting(lazy.clone()))
        .await
        .unwrap();

    scheduler.start().await;
    wait_until(|| eager.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(lazy.load(Ordering::SeqCst), 0);
    let job = info(&scheduler, "lazy").await;
    assert!(job.next_run.unwrap() > Utc::now() + chrono::Duration::minutes(59));

    scheduler.stop().await;
}

#[tokio::test]
async fn test_pause_stops_timer_and_resume_restarts_it() {
    let scheduler = scheduler();
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register("tick", Duration::from_millis(30), false, counting(counter.clone()))
        .await
        .unwrap();
    scheduler.start().await;
    wait_until(|| counter.load(Ordering::SeqCst) >= 2).await;

    scheduler.pause("tick").await.unwrap();
    let job = info(&scheduler, "tick").await;
    assert!(job.paused);
    assert!(job.next_run.is_none());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let paused_at = counter.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(counter.load(Ordering::SeqCst), paused_at);

    // A paused job can still be run by hand
    scheduler.run_now("tick").await.unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), paused_at + 1);

    scheduler.resume("tick").await.unwrap();
    wait_until(|| counter.load(Ordering::SeqCst) >= paused_at + 3).await;

    scheduler.stop().await;
}

#[tokio::test]
async fn test_pause_does_not_cancel_running_action() {
    let scheduler = scheduler();
    let counter = Arc::new(AtomicUsize::new(0));
    let gate = CancellationToken::new();
    scheduler
        .register("slow", Duration::from_secs(3600), false, gated(counter.clone(), gate.clone()))
        .await
        .unwrap();

    let run = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run_now("slow").await.unwrap() }
    });
    wait_until(|| counter.load(Ordering::SeqCst) == 1).await;

    scheduler.pause("slow").await.unwrap();
    gate.cancel();

    assert_eq!(run.await.unwrap(), JobOutcome::Success);
}

#[tokio::test]
async fn test_reregister_replaces_action_and_keeps_pause() {
    let scheduler = scheduler();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    scheduler
        .register("job", Duration::from_secs(60), false, counting(first.clone()))
        .await
        .unwrap();
    scheduler.pause("job").await.unwrap();

    scheduler
        .register("job", Duration::from_secs(120), true, counting(second.clone()))
        .await
        .unwrap();

    let job = info(&scheduler, "job").await;
    assert!(job.paused);
    assert_eq!(job.interval_secs, 120);
    assert_eq!(scheduler.list().await.len(), 1);

    scheduler.run_now("job").await.unwrap();
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_waits_for_cooperative_actions() {
    let scheduler = scheduler();
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register("long", Duration::from_secs(3600), true, gated(counter.clone(), CancellationToken::new()))
        .await
        .unwrap();
    scheduler.start().await;
    wait_until(|| counter.load(Ordering::SeqCst) == 1).await;

    scheduler.stop().await;

    let job = info(&scheduler, "long").await;
    assert!(!job.running);
    assert!(matches!(job.last_outcome, JobOutcome::Failed { .. }));
    assert!(matches!(scheduler.trigger("long").await, Err(Error::ShuttingDown)));
}

#[tokio::test]
async fn test_stop_is_bounded_by_grace_period() {
    let (event_tx, _rx) = broadcast::channel(100);
    let scheduler = Scheduler::new(event_tx, Duration::from_millis(100));
    let started = Arc::new(AtomicUsize::new(0));
    let flag = started.clone();
    scheduler
        .register(
            "stubborn",
            Duration::from_secs(3600),
            true,
            job_fn(move |_cancel| {
                let flag = flag.clone();
                async move {
                    flag.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();
    scheduler.start().await;
    wait_until(|| started.load(Ordering::SeqCst) == 1).await;

    let begin = std::time::Instant::now();
    scheduler.stop().await;
    assert!(begin.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_job_events_are_emitted() {
    let (event_tx, mut rx) = broadcast::channel(100);
    let scheduler = Scheduler::new(event_tx, Duration::from_secs(2));
    scheduler
        .register("cleanup", Duration::from_secs(3600), false, counting(Arc::new(AtomicUsize::new(0))))
        .await
        .unwrap();

    scheduler.run_now("cleanup").await.unwrap();

    assert!(matches!(rx.try_recv().unwrap(), Event::JobStarted { ref job_id } if job_id == "cleanup"));
    assert!(matches!(
        rx.try_recv().unwrap(),
        Event::JobFinished { ref job_id, outcome: JobOutcome::Success } if job_id == "cleanup"
    ));
}

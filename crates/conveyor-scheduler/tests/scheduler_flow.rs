// Run a real scheduler for a few seconds with a one-shot and a per-second job.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conveyor_scheduler::{Job, JobOptions, JobScheduler, SchedulerOptions};

fn counting(count: &Arc<AtomicUsize>) -> impl Fn() -> std::future::Ready<anyhow::Result<()>> {
    let count = Arc::clone(count);
    move || {
        count.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(()))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn once_and_every_second_for_three_seconds() {
    let scheduler = JobScheduler::new(SchedulerOptions::new()).unwrap();

    let once = Arc::new(AtomicUsize::new(0));
    let every = Arc::new(AtomicUsize::new(0));

    scheduler
        .register(Job::once(counting(&once), Utc::now()).unwrap())
        .unwrap();
    scheduler
        .register(
            Job::per_second(counting(&every), JobOptions::new().name("heartbeat")).unwrap(),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;

    assert_eq!(once.load(Ordering::SeqCst), 1);
    assert!(every.load(Ordering::SeqCst) >= 2);
    // The heartbeat is out of the registry while it runs, so allow zero.
    assert!(scheduler.len() <= 1);

    scheduler.close().await;
    assert_eq!(scheduler.job_names(), vec!["heartbeat"]);
    let after_close = every.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(every.load(Ordering::SeqCst), after_close);
    assert_eq!(once.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn construction_errors_surface_before_registration() {
    let err = Job::daily(counting(&Arc::new(AtomicUsize::new(0))), JobOptions::new().hour(25))
        .unwrap_err();
    assert!(err.to_string().contains("hour"));

    let err = Job::new(counting(&Arc::new(AtomicUsize::new(0))), JobOptions::new()).unwrap_err();
    assert!(err.to_string().contains("Invalid schedule"));
}

//! Scheduler start/stop behaviour against real time.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use marketplace::scheduler::{JobId, Scheduler, SchedulerError};

const EVERY_SECOND: &str = "* * * * * *";

fn counting_job(scheduler: &Scheduler, runs: &Arc<AtomicUsize>) -> JobId {
    let runs = runs.clone();
    scheduler
        .add_job("counter", EVERY_SECOND, move || {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
            }
        })
        .expect("valid schedule")
}

#[tokio::test]
async fn runs_jobs_until_stopped() {
    let scheduler = Scheduler::new(Duration::from_secs(2));
    let runs = Arc::new(AtomicUsize::new(0));
    counting_job(&scheduler, &runs);

    scheduler.start();
    scheduler.start();
    assert!(scheduler.is_running());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(scheduler.stats().next_run.is_some());

    tokio::time::sleep(Duration::from_millis(2250)).await;
    assert!(scheduler.stop().await);
    assert!(!scheduler.is_running());

    let observed = runs.load(Ordering::SeqCst);
    assert!(observed >= 1, "expected at least one run, saw {observed}");
    assert!(scheduler.stats().last_run.is_some());

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(runs.load(Ordering::SeqCst), observed);
}

#[tokio::test]
async fn restart_resumes_registered_jobs() {
    let scheduler = Scheduler::new(Duration::from_secs(2));
    let runs = Arc::new(AtomicUsize::new(0));
    counting_job(&scheduler, &runs);

    scheduler.start();
    assert!(scheduler.stop().await);
    let before = runs.load(Ordering::SeqCst);

    scheduler.start();
    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert!(scheduler.stop().await);
    assert!(runs.load(Ordering::SeqCst) > before);
}

#[tokio::test]
async fn removed_job_no_longer_fires() {
    let scheduler = Scheduler::new(Duration::from_secs(2));
    let runs = Arc::new(AtomicUsize::new(0));
    let id = counting_job(&scheduler, &runs);

    scheduler.start();
    scheduler.remove_job(id).expect("registered job");
    assert_eq!(scheduler.stats().job_count, 0);

    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(matches!(
        scheduler.remove_job(id),
        Err(SchedulerError::UnknownJob(_))
    ));
    assert!(scheduler.stop().await);
}

#[tokio::test]
async fn stop_times_out_on_long_running_job() {
    let scheduler = Scheduler::new(Duration::from_millis(200));
    scheduler
        .add_job("slow", EVERY_SECOND, || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .expect("valid schedule");

    scheduler.start();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(!scheduler.stop().await);
}

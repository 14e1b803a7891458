//! In-process cron scheduler.
//!
//! Every registered job runs on its own task, sleeping until the next time its
//! cron expression fires (six fields, seconds first) and then awaiting its
//! callback. A job never overlaps itself; different jobs may overlap freely.
//!
//! [`Scheduler::stop`] cancels the sleeping loops and waits up to the
//! configured timeout for callbacks already in flight. Callbacks that outlive
//! the timeout are left running.

use std::{
    collections::BTreeMap,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    str::FromStr,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::FutureExt;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

const SOURCE: &str = "marketplace::scheduler";

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression `{expression}`: {reason}")]
    InvalidSchedule { expression: String, reason: String },
    #[error("no job registered with id {0}")]
    UnknownJob(JobId),
}

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type JobCallback = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct JobId(u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse a six-field cron expression.
pub fn parse_schedule(expression: &str) -> Result<Schedule, SchedulerError> {
    Schedule::from_str(expression).map_err(|err| SchedulerError::InvalidSchedule {
        expression: expression.to_string(),
        reason: err.to_string(),
    })
}

#[derive(Debug, Default, Clone, Copy)]
struct JobTiming {
    next_run: Option<DateTime<Utc>>,
    last_run: Option<DateTime<Utc>>,
}

struct Job {
    name: String,
    schedule: Schedule,
    callback: JobCallback,
    timing: Arc<Mutex<JobTiming>>,
    cancel: Option<CancellationToken>,
}

struct State {
    running: bool,
    cancel: CancellationToken,
    jobs: BTreeMap<JobId, Job>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub running: bool,
    pub job_count: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_run: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_run: Option<OffsetDateTime>,
}

pub struct Scheduler {
    state: Mutex<State>,
    tracker: TaskTracker,
    next_id: AtomicU64,
    shutdown_timeout: Duration,
}

impl Scheduler {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                running: false,
                cancel: CancellationToken::new(),
                jobs: BTreeMap::new(),
            }),
            tracker: TaskTracker::new(),
            next_id: AtomicU64::new(1),
            shutdown_timeout,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a job. It starts immediately when the scheduler is running,
    /// otherwise on the next [`start`](Self::start).
    pub fn add_job<F, Fut>(
        &self,
        name: impl Into<String>,
        expression: &str,
        callback: F,
    ) -> Result<JobId, SchedulerError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let schedule = parse_schedule(expression)?;
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback: JobCallback = Arc::new(move || Box::pin(callback()) as JobFuture);
        let mut job = Job {
            name: name.into(),
            schedule,
            callback,
            timing: Arc::new(Mutex::new(JobTiming::default())),
            cancel: None,
        };

        let mut state = self.state();
        if state.running {
            self.launch(&mut job, &state.cancel);
        }
        debug!(target = SOURCE, job = %job.name, id = %id, expression, "job registered");
        state.jobs.insert(id, job);
        Ok(id)
    }

    /// Cancel and unregister a job. A callback already running is not interrupted.
    pub fn remove_job(&self, id: JobId) -> Result<(), SchedulerError> {
        let job = self
            .state()
            .jobs
            .remove(&id)
            .ok_or(SchedulerError::UnknownJob(id))?;
        if let Some(cancel) = job.cancel {
            cancel.cancel();
        }
        debug!(target = SOURCE, job = %job.name, id = %id, "job removed");
        Ok(())
    }

    /// Begin executing every registered job. Calling it while running is a no-op.
    pub fn start(&self) {
        let mut state = self.state();
        if state.running {
            debug!(target = SOURCE, "scheduler already running");
            return;
        }

        state.running = true;
        state.cancel = CancellationToken::new();
        self.tracker.reopen();

        let cancel = state.cancel.clone();
        for job in state.jobs.values_mut() {
            self.launch(job, &cancel);
        }
        info!(target = SOURCE, jobs = state.jobs.len(), "scheduler started");
    }

    /// Signal every job loop to stop and wait up to the shutdown timeout for
    /// in-flight callbacks. Returns `true` when everything finished in time.
    pub async fn stop(&self) -> bool {
        {
            let mut state = self.state();
            if !state.running {
                return true;
            }
            state.running = false;
            state.cancel.cancel();
            for job in state.jobs.values_mut() {
                job.cancel = None;
            }
        }

        self.tracker.close();
        match tokio::time::timeout(self.shutdown_timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!(target = SOURCE, "scheduler stopped");
                true
            }
            Err(_) => {
                warn!(
                    target = SOURCE,
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    pending = self.tracker.len(),
                    "scheduler stop timed out with jobs still running"
                );
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state().running
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.state();
        let timings: Vec<JobTiming> = state
            .jobs
            .values()
            .map(|job| *job.timing.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
            .collect();

        SchedulerStats {
            running: state.running,
            job_count: state.jobs.len(),
            next_run: timings
                .iter()
                .filter_map(|t| t.next_run)
                .min()
                .and_then(to_offset),
            last_run: timings
                .iter()
                .filter_map(|t| t.last_run)
                .max()
                .and_then(to_offset),
        }
    }

    fn launch(&self, job: &mut Job, parent: &CancellationToken) {
        let cancel = parent.child_token();
        job.cancel = Some(cancel.clone());
        self.tracker.spawn(run_job(
            job.name.clone(),
            job.schedule.clone(),
            job.callback.clone(),
            job.timing.clone(),
            cancel,
        ));
    }
}

async fn run_job(
    name: String,
    schedule: Schedule,
    callback: JobCallback,
    timing: Arc<Mutex<JobTiming>>,
    cancel: CancellationToken,
) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            debug!(target = SOURCE, job = %name, "schedule has no further runs");
            break;
        };
        set_timing(&timing, |t| t.next_run = Some(next));

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        set_timing(&timing, |t| {
            t.last_run = Some(Utc::now());
            t.next_run = None;
        });
        counter!("marketplace_scheduler_job_runs_total", "job" => name.clone()).increment(1);
        debug!(target = SOURCE, job = %name, "job firing");

        if AssertUnwindSafe(callback()).catch_unwind().await.is_err() {
            counter!("marketplace_scheduler_job_panics_total", "job" => name.clone()).increment(1);
            error!(target = SOURCE, job = %name, "job panicked; continuing with next run");
        }
    }
}

fn set_timing(timing: &Mutex<JobTiming>, update: impl FnOnce(&mut JobTiming)) {
    let mut guard = timing.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    update(&mut guard);
}

fn to_offset(at: DateTime<Utc>) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(at.timestamp_nanos_opt()?)).ok()
}

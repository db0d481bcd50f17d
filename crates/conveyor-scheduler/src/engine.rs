use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use conveyor_core::config::SchedulerConfig;
use conveyor_core::log::{Field, Logger, TracingLogger};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::{
    error::{Result, SchedulerError},
    job::Job,
};

pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

/// Construction options for [`JobScheduler`].
#[derive(Clone)]
pub struct SchedulerOptions {
    tick: Duration,
    logger: Option<Arc<dyn Logger>>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            logger: None,
        }
    }
}

impl SchedulerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::default().tick(Duration::from_millis(config.tick_ms))
    }

    /// How often the run loop scans for a due job.
    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }
}

struct Shared {
    /// Storage order decides which of several due jobs runs first.
    jobs: Mutex<Vec<Job>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    logger: Arc<dyn Logger>,
}

impl Shared {
    /// Remove and return the first job, in storage order, that is due at `now`.
    fn take_due(&self, now: DateTime<Utc>) -> Option<Job> {
        let mut jobs = self.jobs.lock().expect("job registry poisoned");
        let index = jobs.iter().position(|job| job.is_due(now))?;
        Some(jobs.remove(index))
    }

    fn push(&self, job: Job) {
        self.jobs.lock().expect("job registry poisoned").push(job);
    }
}

/// In-process scheduler for recurring and one-shot jobs.
///
/// A single background task wakes every tick, takes the first due job out of
/// the registry, runs it outside the lock and puts recurring jobs back at the
/// end. Selection is by storage order, not by earliest deadline.
pub struct JobScheduler {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    /// Create a scheduler and start its run loop on the current tokio runtime.
    pub fn new(options: SchedulerOptions) -> Result<Self> {
        if options.tick.is_zero() {
            return Err(SchedulerError::InvalidSchedule(
                "tick must be greater than 0".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SchedulerError::Runtime(e.to_string()))?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            jobs: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            shutdown,
            logger: options
                .logger
                .unwrap_or_else(|| TracingLogger::shared("scheduler")),
        });

        let task_shared = Arc::clone(&shared);
        let tick = options.tick;
        let handle = runtime.spawn(async move { run(task_shared, tick, shutdown_rx).await });

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Add `job` to the end of the registry.
    pub fn register(&self, job: Job) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(SchedulerError::Closed);
        }
        self.shared.logger.debug(
            "job registered",
            &[
                Field::new("job_id", job.id()),
                Field::new("job", job.name()),
                Field::new("next_run", job.next_run().to_rfc3339()),
            ],
        );
        self.shared.push(job);
        Ok(())
    }

    /// Number of jobs waiting in the registry. A job that is currently
    /// running is not counted.
    pub fn len(&self) -> usize {
        self.shared.jobs.lock().expect("job registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of the registered jobs in storage order.
    pub fn job_names(&self) -> Vec<String> {
        self.shared
            .jobs
            .lock()
            .expect("job registry poisoned")
            .iter()
            .map(|job| job.name().to_string())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Stop the run loop and wait for it to exit.
    ///
    /// A job that is already running is allowed to finish; no job starts
    /// after this returns. Later calls return immediately.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.shutdown.send_replace(true);

        let handle = self.handle.lock().expect("run loop handle poisoned").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                self.shared.logger.error(
                    "scheduler run loop terminated abnormally",
                    &[Field::new("error", e)],
                );
            }
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.shared.shutdown.send_replace(true);
        }
    }
}

/// Main loop: one due job per tick until shutdown.
async fn run(shared: Arc<Shared>, tick: Duration, mut shutdown: watch::Receiver<bool>) {
    shared.logger.info("scheduler started", &[]);

    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => break,
            _ = ticker.tick() => {}
        }

        let Some(mut job) = shared.take_due(Utc::now()) else {
            continue;
        };

        let fields = [Field::new("job_id", job.id()), Field::new("job", job.name())];
        shared.logger.debug("executing job", &fields);

        // Own task so a panicking job is reported as a JoinError instead of
        // tearing down the loop.
        let work = job.start(Utc::now());
        let failure = match tokio::spawn(work).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(("job error", format!("{e:#}"))),
            Err(e) => Some(("job panicked", e.to_string())),
        };
        if let Some((message, error)) = failure {
            let mut with_error = fields.to_vec();
            with_error.push(Field::new("error", error));
            shared.logger.error(message, &with_error);
        }

        if job.is_once() {
            shared.logger.debug("one-shot job discarded", &fields);
        } else {
            shared.push(job);
        }
    }

    shared.logger.info("scheduler stopped", &[]);
}

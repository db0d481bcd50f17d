use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use uuid::Uuid;

use crate::{
    error::{Result, SchedulerError},
    schedule,
    types::{Interval, TimeOfDay, Trigger},
};

/// Future returned by a job's work function.
pub type JobFuture = BoxFuture<'static, anyhow::Result<()>>;

type Work = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Settings for [`Job::new`]. Either [`once`](Self::once) or
/// [`interval`](Self::interval) must be set; `once` wins when both are.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    name: Option<String>,
    interval: Option<Interval>,
    once: Option<DateTime<Utc>>,
    hour: Option<u32>,
    minute: Option<u32>,
    second: Option<u32>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label used in log records.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn interval(mut self, interval: Interval) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn once(mut self, at: DateTime<Utc>) -> Self {
        self.once = Some(at);
        self
    }

    /// Hour offset (0..=23) of a recurring job.
    pub fn hour(mut self, hour: u32) -> Self {
        self.hour = Some(hour);
        self
    }

    /// Minute offset (0..=59) of a recurring job.
    pub fn minute(mut self, minute: u32) -> Self {
        self.minute = Some(minute);
        self
    }

    /// Second offset (0..=59) of a recurring job.
    pub fn second(mut self, second: u32) -> Self {
        self.second = Some(second);
        self
    }

    fn time_of_day(&self) -> Result<Option<TimeOfDay>> {
        if self.hour.is_none() && self.minute.is_none() && self.second.is_none() {
            return Ok(None);
        }
        TimeOfDay::new(
            self.hour.unwrap_or(0),
            self.minute.unwrap_or(0),
            self.second.unwrap_or(0),
        )
        .map(Some)
    }
}

/// A unit of scheduled work.
pub struct Job {
    id: Uuid,
    name: String,
    trigger: Trigger,
    last_run: DateTime<Utc>,
    work: Work,
}

impl Job {
    /// Build a job from an async work function.
    ///
    /// `last_run` starts at construction time, so a recurring job first
    /// fires one interval after it was created.
    pub fn new<F, Fut>(work: F, options: JobOptions) -> Result<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let time_of_day = options.time_of_day()?;
        let trigger = match (options.once, options.interval) {
            (Some(at), _) => Trigger::Once { at },
            (None, Some(interval)) => Trigger::Recurring {
                interval,
                time_of_day,
            },
            (None, None) => {
                return Err(SchedulerError::InvalidSchedule(
                    "job needs either a one-shot time or an interval".to_string(),
                ))
            }
        };

        let id = Uuid::new_v4();
        let name = options
            .name
            .unwrap_or_else(|| format!("job-{}", &id.simple().to_string()[..8]));

        Ok(Self {
            id,
            name,
            trigger,
            last_run: Utc::now(),
            work: Arc::new(move || -> JobFuture { Box::pin(work()) }),
        })
    }

    /// Every day at midnight UTC, shifted by any hour/minute/second in `options`.
    pub fn daily<F, Fut>(work: F, options: JobOptions) -> Result<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(work, options.interval(Interval::Day))
    }

    pub fn per_second<F, Fut>(work: F, options: JobOptions) -> Result<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(work, options.interval(Interval::Second))
    }

    pub fn per_minute<F, Fut>(work: F, options: JobOptions) -> Result<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(work, options.interval(Interval::Minute))
    }

    /// Fire once at or after `at`.
    pub fn once<F, Fut>(work: F, at: DateTime<Utc>) -> Result<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(work, JobOptions::new().once(at))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn last_run(&self) -> DateTime<Utc> {
        self.last_run
    }

    pub fn is_once(&self) -> bool {
        matches!(self.trigger, Trigger::Once { .. })
    }

    pub fn next_run(&self) -> DateTime<Utc> {
        schedule::next_run(&self.trigger, self.last_run)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        schedule::is_due(&self.trigger, self.last_run, now)
    }

    /// Record `now` as the last run and hand back the work future.
    pub(crate) fn start(&mut self, now: DateTime<Utc>) -> JobFuture {
        self.last_run = now;
        (self.work)()
    }

    #[cfg(test)]
    pub(crate) fn set_last_run(&mut self, at: DateTime<Utc>) {
        self.last_run = at;
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .field("last_run", &self.last_run)
            .finish_non_exhaustive()
    }
}

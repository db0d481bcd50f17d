use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The provided schedule definition is invalid or unsupported.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A time-of-day component is outside its natural range.
    #[error("Invalid time of day: {field} = {value} (max {max})")]
    InvalidTime {
        field: &'static str,
        value: u32,
        max: u32,
    },

    /// The scheduler has been closed and accepts no more jobs.
    #[error("Scheduler is closed")]
    Closed,

    /// The run loop could not be started (no tokio runtime in scope).
    #[error("Runtime unavailable: {0}")]
    Runtime(String),
}

impl SchedulerError {
    pub fn is_closed(&self) -> bool {
        matches!(self, SchedulerError::Closed)
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

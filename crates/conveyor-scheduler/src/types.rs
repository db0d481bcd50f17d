use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// Calendar unit a recurring job advances by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Second,
    Minute,
    Hour,
    /// Start of the next calendar day.
    Day,
    /// Monday 00:00 of the following week.
    Week,
    /// First day of the next month.
    Month,
    /// First day of the next quarter (Jan, Apr, Jul, Oct).
    Quarter,
    /// 1 January of the next year.
    Year,
}

/// Offset added to a recurring job's candidate time, e.g. 02:30:00 turns a
/// daily job into "every day at 02:30 UTC".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32, second: u32) -> Result<Self> {
        Ok(Self {
            hour: check("hour", hour, 23)?,
            minute: check("minute", minute, 59)?,
            second: check("second", second, 59)?,
        })
    }

    pub fn as_duration(&self) -> Duration {
        Duration::hours(self.hour as i64)
            + Duration::minutes(self.minute as i64)
            + Duration::seconds(self.second as i64)
    }
}

fn check(field: &'static str, value: u32, max: u32) -> Result<u8> {
    if value > max {
        return Err(SchedulerError::InvalidTime { field, value, max });
    }
    Ok(value as u8)
}

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Run exactly once at or after the given UTC instant.
    Once { at: DateTime<Utc> },

    /// Run every `interval`, shifted by `time_of_day` when set.
    Recurring {
        interval: Interval,
        time_of_day: Option<TimeOfDay>,
    },
}

//! `conveyor-scheduler` — in-process scheduler for recurring and one-shot jobs.
//!
//! # Overview
//!
//! Jobs live in a mutex-guarded list inside [`engine::JobScheduler`]. A single
//! tokio task wakes every tick (50 ms by default), takes the first due job
//! out of the list, runs it, and re-appends it if it is recurring.
//!
//! # Intervals
//!
//! | Variant   | Next run after `last_run`                 |
//! |-----------|-------------------------------------------|
//! | `Second`  | `last_run + 1s`                           |
//! | `Minute`  | `last_run + 1m`                           |
//! | `Hour`    | `last_run + 1h`                           |
//! | `Day`     | 00:00 UTC of the next day                 |
//! | `Week`    | Monday 00:00 UTC of the next week         |
//! | `Month`   | 1st of the next month                     |
//! | `Quarter` | 1st of the next quarter                   |
//! | `Year`    | 1 January of the next year                |
//!
//! An optional hour/minute/second offset is added to the result.

pub mod engine;
pub mod error;
pub mod job;
pub mod schedule;
pub mod types;

pub use engine::{JobScheduler, SchedulerOptions};
pub use error::{Result, SchedulerError};
pub use job::{Job, JobFuture, JobOptions};
pub use types::{Interval, TimeOfDay, Trigger};

pub mod config;
pub mod error;
pub mod log;

pub use config::{ConveyorConfig, OverflowConfig, QueueConfig, SchedulerConfig};
pub use error::{ConveyorError, Result};
pub use log::{Field, Level, Logger, TracingLogger};

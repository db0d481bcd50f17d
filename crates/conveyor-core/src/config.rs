use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{ConveyorError, Result};

pub const DEFAULT_QUEUE_SIZE: usize = 100;
pub const DEFAULT_LOAD_INTERVAL_MS: u64 = 100;
pub const DEFAULT_TICK_MS: u64 = 50;
pub const DEFAULT_QUEUE_NAME: &str = "default";

/// Top-level config (conveyor.toml + CONVEYOR_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConveyorConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Capacity of the in-memory buffer.
    #[serde(default = "default_queue_size")]
    pub size: usize,
    /// Milliseconds between two replenishment attempts from the overflow store.
    #[serde(default = "default_load_interval_ms")]
    pub load_interval_ms: u64,
    /// Logical queue name; rows in a shared overflow table are keyed by it.
    #[serde(default = "default_queue_name")]
    pub name: String,
    /// When present, items that do not fit in memory spill to SQLite.
    #[serde(default)]
    pub overflow: Option<OverflowConfig>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_QUEUE_SIZE,
            load_interval_ms: DEFAULT_LOAD_INTERVAL_MS,
            name: default_queue_name(),
            overflow: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverflowConfig {
    #[serde(default = "default_overflow_path")]
    pub path: String,
}

impl Default for OverflowConfig {
    fn default() -> Self {
        Self {
            path: default_overflow_path(),
        }
    }
}

impl OverflowConfig {
    /// Create the directory that will hold the overflow database.
    pub fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = std::path::Path::new(&self.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Milliseconds between two scans of the job list.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
        }
    }
}

fn default_queue_size() -> usize {
    DEFAULT_QUEUE_SIZE
}
fn default_load_interval_ms() -> u64 {
    DEFAULT_LOAD_INTERVAL_MS
}
fn default_queue_name() -> String {
    DEFAULT_QUEUE_NAME.to_string()
}
fn default_tick_ms() -> u64 {
    DEFAULT_TICK_MS
}
fn default_overflow_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.conveyor/overflow.db", home)
}

impl ConveyorConfig {
    /// Load config from a TOML file with CONVEYOR_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.conveyor/conveyor.toml
    ///
    /// Nested keys are separated by a double underscore in env vars, e.g.
    /// `CONVEYOR_QUEUE__LOAD_INTERVAL_MS=250`. A missing file is not an error.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ConveyorConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CONVEYOR_").split("__"))
            .extract()
            .map_err(|e| ConveyorError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the queue and scheduler constructors would refuse anyway,
    /// so a bad file fails at startup with the offending key in the message.
    pub fn validate(&self) -> Result<()> {
        if self.queue.size == 0 {
            return Err(ConveyorError::Config(
                "queue.size must be greater than 0".to_string(),
            ));
        }
        if self.queue.load_interval_ms == 0 {
            return Err(ConveyorError::Config(
                "queue.load_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.queue.name.trim().is_empty() {
            return Err(ConveyorError::Config(
                "queue.name must not be empty".to_string(),
            ));
        }
        if self.scheduler.tick_ms == 0 {
            return Err(ConveyorError::Config(
                "scheduler.tick_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.conveyor/conveyor.toml", home)
}

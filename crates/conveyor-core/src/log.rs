//! Leveled log sink shared by the queue and the scheduler.
//!
//! Components accept an optional `Arc<dyn Logger>`; when none is supplied
//! they fall back to [`TracingLogger`], which turns every call into a
//! `tracing` event so the process-wide subscriber decides where it goes.

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        };
        write!(f, "{s}")
    }
}

/// A single structured key/value attached to a log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub value: String,
}

impl Field {
    pub fn new(name: &'static str, value: impl fmt::Display) -> Self {
        Self {
            name,
            value: value.to_string(),
        }
    }
}

/// Render fields as `name=value` pairs separated by spaces.
pub fn render_fields(fields: &[Field]) -> String {
    fields
        .iter()
        .map(|f| format!("{}={}", f.name, f.value))
        .collect::<Vec<_>>()
        .join(" ")
}

pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: &str, fields: &[Field]);

    fn trace(&self, message: &str, fields: &[Field]) {
        self.log(Level::Trace, message, fields);
    }

    fn debug(&self, message: &str, fields: &[Field]) {
        self.log(Level::Debug, message, fields);
    }

    fn info(&self, message: &str, fields: &[Field]) {
        self.log(Level::Info, message, fields);
    }

    fn warn(&self, message: &str, fields: &[Field]) {
        self.log(Level::Warn, message, fields);
    }

    fn error(&self, message: &str, fields: &[Field]) {
        self.log(Level::Error, message, fields);
    }

    /// Logged at error level with `fatal = true`. Never aborts the process.
    fn fatal(&self, message: &str, fields: &[Field]) {
        self.log(Level::Fatal, message, fields);
    }
}

/// Forwards records to the `tracing` subscriber installed by the binary.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger {
    component: Option<&'static str>,
}

impl TracingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag every record with `component = <name>`.
    pub fn for_component(component: &'static str) -> Self {
        Self {
            component: Some(component),
        }
    }

    pub fn shared(component: &'static str) -> Arc<dyn Logger> {
        Arc::new(Self::for_component(component))
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: Level, message: &str, fields: &[Field]) {
        let component = self.component.unwrap_or("conveyor");
        let fields = render_fields(fields);
        match level {
            Level::Trace => tracing::trace!(component, %fields, "{message}"),
            Level::Debug => tracing::debug!(component, %fields, "{message}"),
            Level::Info => tracing::info!(component, %fields, "{message}"),
            Level::Warn => tracing::warn!(component, %fields, "{message}"),
            Level::Error => tracing::error!(component, %fields, "{message}"),
            Level::Fatal => tracing::error!(component, fatal = true, %fields, "{message}"),
        }
    }
}

//! Log event representation shipped by the writer.
//!
//! [`LogEvent`] is the event type produced by the `log` bridge and understood
//! by [`JsonEncoder`](crate::encoder::JsonEncoder). The writer itself is
//! generic over its event type; callers with their own event model plug in a
//! matching [`Encoder`](crate::encoder::Encoder) instead.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::SystemTime;

/// Severity attached to a [`LogEvent`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Self::Trace),
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            _ => Err(()),
        }
    }
}

impl From<log::Level> for Level {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => Level::Trace,
            log::Level::Debug => Level::Debug,
            log::Level::Info => Level::Info,
            log::Level::Warn => Level::Warn,
            log::Level::Error => Level::Error,
        }
    }
}

/// Source location and thread context captured with an event.
#[derive(Clone, Debug)]
pub struct EventMetadata {
    /// Rust module path where the log call originated.
    pub module_path: String,
    /// Source file name for the log call.
    pub filename: String,
    /// Line number in the source file.
    pub line_number: u32,
    /// Time the event was created.
    pub timestamp: SystemTime,
    /// Name of the thread that created the event (if any).
    pub thread_name: Option<String>,
    /// Structured key-value pairs attached to the event.
    pub key_values: BTreeMap<String, String>,
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self {
            module_path: String::new(),
            filename: String::new(),
            line_number: 0,
            timestamp: SystemTime::now(),
            thread_name: thread::current().name().map(ToString::to_string),
            key_values: BTreeMap::new(),
        }
    }
}

/// A single log event queued for shipping.
#[derive(Clone, Debug)]
pub struct LogEvent {
    /// Name of the logger (or `log` target) that produced the event.
    pub logger: String,
    pub level: Level,
    pub message: String,
    pub metadata: EventMetadata,
}

impl LogEvent {
    /// Construct an event stamped with the current time and thread.
    pub fn new(logger: &str, level: Level, message: &str) -> Self {
        Self::with_metadata(logger, level, message, EventMetadata::default())
    }

    /// Construct an event with explicit metadata.
    pub fn with_metadata(logger: &str, level: Level, message: &str, metadata: EventMetadata) -> Self {
        Self {
            logger: logger.to_owned(),
            level,
            message: message.to_owned(),
            metadata,
        }
    }

    /// Attach a structured key-value pair.
    pub fn with_key_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.key_values.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.logger, self.level, self.message)
    }
}

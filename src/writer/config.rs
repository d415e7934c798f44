//! Immutable writer settings.
//!
//! `WriterBuilder` assembles these values; [`WriterConfig::validate`] runs
//! again when a [`BufferedWriter`](super::BufferedWriter) starts, so a
//! hand-built config cannot bypass the checks.

use std::time::Duration;

use crate::{
    builder::BuildError, connection::RetryLimit, rate_limited_warner::DEFAULT_WARN_INTERVAL,
};

use super::delivery::DeliveryMethod;

/// Default queue length that triggers a synchronous flush.
pub const DEFAULT_MAX_BUFFERED_ITEMS: usize = 1000;
/// Default maximum time between two flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
/// Default number of initial connection attempts.
pub const DEFAULT_MAX_INIT_TRIES: u32 = 5;
/// Default pause between initial connection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Settings fixed for the lifetime of a [`BufferedWriter`](super::BufferedWriter).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriterConfig {
    /// List key or channel name events are shipped to.
    pub destination_key: String,
    pub delivery_method: DeliveryMethod,
    /// Queue length at which `append` flushes on the calling thread.
    pub max_buffered_items: usize,
    /// Maximum age of the oldest unflushed batch.
    pub flush_interval: Duration,
    pub max_init_tries: RetryLimit,
    pub retry_interval: Duration,
    /// Optional bound on queued events; `None` keeps the queue unbounded.
    /// A bound below `max_buffered_items` leaves only the interval flush.
    pub queue_capacity: Option<usize>,
    /// Minimum gap between two drop warnings.
    pub warn_interval: Duration,
}

impl WriterConfig {
    /// Defaults for everything except the destination.
    pub fn new(destination_key: impl Into<String>) -> Self {
        Self {
            destination_key: destination_key.into(),
            delivery_method: DeliveryMethod::default(),
            max_buffered_items: DEFAULT_MAX_BUFFERED_ITEMS,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_init_tries: RetryLimit::Bounded(DEFAULT_MAX_INIT_TRIES),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            queue_capacity: None,
            warn_interval: DEFAULT_WARN_INTERVAL,
        }
    }

    /// Reject settings the writer cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::InvalidConfig`] for an empty destination key,
    /// zero batch size, queue capacity, init tries or retry interval, or a
    /// flush interval under one millisecond.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.destination_key.trim().is_empty() {
            return Err(invalid("writer requires a destination key"));
        }
        if self.max_buffered_items == 0 {
            return Err(invalid("max_buffered_items must be greater than zero"));
        }
        if self.flush_interval.as_millis() == 0 {
            return Err(invalid("flush_interval must be at least 1ms"));
        }
        if let RetryLimit::Bounded(0) = self.max_init_tries {
            return Err(invalid("max_init_tries must be greater than zero"));
        }
        if self.retry_interval.is_zero() {
            return Err(invalid("retry_interval must be greater than zero"));
        }
        if self.queue_capacity == Some(0) {
            return Err(invalid("queue_capacity must be greater than zero"));
        }
        Ok(())
    }

    /// True when the queue bound is below `max_buffered_items`, so the queue
    /// can never grow long enough for the size trigger and batches are
    /// shipped by the interval flush alone.
    pub fn size_trigger_unreachable(&self) -> bool {
        self.queue_capacity
            .is_some_and(|capacity| capacity < self.max_buffered_items)
    }
}

fn invalid(message: &str) -> BuildError {
    BuildError::InvalidConfig(message.to_owned())
}

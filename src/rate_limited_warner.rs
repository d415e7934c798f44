//! Rate-limited reporting of dropped events.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crate::clock::{TimeProvider, system_time_provider};

/// Default minimum gap between two drop warnings.
pub const DEFAULT_WARN_INTERVAL: Duration = Duration::from_secs(5);

/// Helper that rate limits dropped-event warnings.
///
/// The caller increments the drop counter via [`record_drop`](Self::record_drop).
/// The next call to [`warn_if_due`](Self::warn_if_due) emits a warning through
/// the supplied callback once the configured interval has elapsed.
/// [`flush`](Self::flush) reports pending drops immediately.
pub struct RateLimitedWarner {
    last_warn_ms: AtomicU64,
    dropped: AtomicU64,
    interval_ms: u64,
    time_provider: TimeProvider,
}

impl RateLimitedWarner {
    /// Create a warner using the system clock. The first warning can be
    /// emitted immediately.
    pub fn new(interval: Duration) -> Self {
        Self::with_time_provider(interval, system_time_provider())
    }

    /// Create a warner reading "now" from `time_provider`.
    pub fn with_time_provider(interval: Duration, time_provider: TimeProvider) -> Self {
        let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        Self {
            last_warn_ms: AtomicU64::new(time_provider().saturating_sub(interval_ms)),
            dropped: AtomicU64::new(0),
            interval_ms,
            time_provider,
        }
    }

    /// Increment the dropped-event counter.
    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the dropped-event counter by `count`.
    pub fn record_drops(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Emit a warning if the rate limit interval has elapsed.
    pub fn warn_if_due(&self, mut warn: impl FnMut(u64)) {
        let now = (self.time_provider)();
        let prev = self.last_warn_ms.load(Ordering::Relaxed);
        if now.saturating_sub(prev) >= self.interval_ms {
            let count = self.dropped.swap(0, Ordering::Relaxed);
            if count > 0 {
                warn(count);
            }
            self.last_warn_ms.store(now, Ordering::Relaxed);
        }
    }

    /// Immediately warn about any dropped events.
    pub fn flush(&self, mut warn: impl FnMut(u64)) {
        let count = self.dropped.swap(0, Ordering::Relaxed);
        if count > 0 {
            warn(count);
            self.last_warn_ms.store((self.time_provider)(), Ordering::Relaxed);
        }
    }
}

impl Default for RateLimitedWarner {
    fn default() -> Self {
        Self::new(DEFAULT_WARN_INTERVAL)
    }
}

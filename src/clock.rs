//! Wall-clock helpers shared by the batching and warning components.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

/// Source of "now" in milliseconds since the UNIX epoch.
///
/// Injected into components whose decisions depend on elapsed time so tests
/// can drive the clock explicitly.
pub type TimeProvider = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Returns the current time in milliseconds since the UNIX epoch.
///
/// Returns 0 if the system clock is before the UNIX epoch.
pub fn system_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Time provider backed by [`system_time_millis`].
pub fn system_time_provider() -> TimeProvider {
    Arc::new(system_time_millis)
}

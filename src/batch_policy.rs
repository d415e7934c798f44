//! Size/age policy deciding when an accumulating batch should be shipped.
//!
//! [`BatchPolicy`] counts recorded items and remembers when the first item of
//! the current batch arrived. A batch is finished once it holds
//! `max_batch_items` items or once its first item is older than
//! `max_batch_age`. Declaring a batch finished resets the policy so the next
//! recorded item opens a fresh batch.
//!
//! Recording is lock-free with respect to other recorders: concurrent
//! [`BatchPolicy::record`] calls share a read guard, while the reset inside
//! [`BatchPolicy::is_finished`] takes the write side so it never interleaves
//! with an in-flight record.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use parking_lot::RwLock;

use crate::clock::{TimeProvider, system_time_provider};

const NO_BATCH_TIME: u64 = u64::MAX;

/// Counter/clock state for the batch currently being accumulated.
pub struct BatchPolicy {
    max_batch_items: u64,
    max_batch_age_ms: u64,
    count: AtomicU64,
    first_item_ms: AtomicU64,
    reset_guard: RwLock<()>,
    time_provider: TimeProvider,
}

impl BatchPolicy {
    /// Create a policy using the system clock.
    pub fn new(max_batch_items: usize, max_batch_age: Duration) -> Self {
        Self::with_time_provider(max_batch_items, max_batch_age, system_time_provider())
    }

    /// Create a policy reading "now" from `time_provider`.
    pub fn with_time_provider(
        max_batch_items: usize,
        max_batch_age: Duration,
        time_provider: TimeProvider,
    ) -> Self {
        Self {
            max_batch_items: u64::try_from(max_batch_items).unwrap_or(u64::MAX),
            max_batch_age_ms: u64::try_from(max_batch_age.as_millis()).unwrap_or(u64::MAX),
            count: AtomicU64::new(0),
            first_item_ms: AtomicU64::new(NO_BATCH_TIME),
            reset_guard: RwLock::new(()),
            time_provider,
        }
    }

    /// Count one more item in the current batch.
    ///
    /// The batch age is measured from the first item recorded after a reset;
    /// later items never move that timestamp.
    pub fn record(&self) {
        let _guard = self.reset_guard.read();
        self.count.fetch_add(1, Ordering::AcqRel);
        let now = (self.time_provider)();
        let _ = self.first_item_ms.compare_exchange(
            NO_BATCH_TIME,
            now,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Number of items recorded in the current batch.
    pub fn processed_items(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Report whether the current batch is full or stale.
    ///
    /// Returns `true` at most once per batch: a positive answer resets the
    /// counters before the write guard is released.
    pub fn is_finished(&self) -> bool {
        let _guard = self.reset_guard.write();
        if self.items_limit_reached() || self.age_limit_reached() {
            self.count.store(0, Ordering::Release);
            self.first_item_ms.store(NO_BATCH_TIME, Ordering::Release);
            return true;
        }
        false
    }

    fn items_limit_reached(&self) -> bool {
        self.count.load(Ordering::Acquire) >= self.max_batch_items
    }

    fn age_limit_reached(&self) -> bool {
        let first = self.first_item_ms.load(Ordering::Acquire);
        if first == NO_BATCH_TIME {
            return false;
        }
        (self.time_provider)().saturating_sub(first) > self.max_batch_age_ms
    }
}

impl fmt::Debug for BatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let first = self.first_item_ms.load(Ordering::Relaxed);
        f.debug_struct("BatchPolicy")
            .field("max_batch_items", &self.max_batch_items)
            .field("max_batch_age_ms", &self.max_batch_age_ms)
            .field("count", &self.count.load(Ordering::Relaxed))
            .field("first_item_ms", &(first != NO_BATCH_TIME).then_some(first))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, atomic::AtomicU64};
    use std::thread;

    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    fn manual_clock(start: u64) -> (Arc<AtomicU64>, TimeProvider) {
        let now = Arc::new(AtomicU64::new(start));
        let reader = Arc::clone(&now);
        (now, Arc::new(move || reader.load(Ordering::Relaxed)))
    }

    #[rstest]
    fn size_limit_finishes_batch_and_starts_fresh() {
        let (_, clock) = manual_clock(1_000);
        let policy = BatchPolicy::with_time_provider(2, Duration::from_secs(100), clock);

        policy.record();
        assert!(!policy.is_finished());
        policy.record();
        assert!(policy.is_finished());
        policy.record();
        assert!(!policy.is_finished());
        assert_eq!(policy.processed_items(), 1);
    }

    #[rstest]
    fn age_limit_finishes_batch() {
        let (now, clock) = manual_clock(10_000);
        let policy = BatchPolicy::with_time_provider(100, Duration::from_secs(1), clock);

        policy.record();
        assert!(!policy.is_finished());
        now.store(11_500, Ordering::Relaxed);
        assert!(policy.is_finished());
        assert_eq!(policy.processed_items(), 0);
    }

    #[rstest]
    fn age_is_measured_from_first_item() {
        let (now, clock) = manual_clock(0);
        let policy = BatchPolicy::with_time_provider(100, Duration::from_millis(500), clock);

        policy.record();
        now.store(400, Ordering::Relaxed);
        policy.record();
        now.store(501, Ordering::Relaxed);
        assert!(policy.is_finished());
    }

    #[rstest]
    fn age_limit_is_exclusive() {
        let (now, clock) = manual_clock(0);
        let policy = BatchPolicy::with_time_provider(100, Duration::from_millis(500), clock);

        policy.record();
        now.store(500, Ordering::Relaxed);
        assert!(!policy.is_finished());
    }

    #[rstest]
    fn empty_batch_never_ages_out() {
        let (now, clock) = manual_clock(0);
        let policy = BatchPolicy::with_time_provider(10, Duration::from_millis(1), clock);
        now.store(60_000, Ordering::Relaxed);
        assert!(!policy.is_finished());
    }

    #[rstest]
    fn real_clock_age_limit() {
        let policy = BatchPolicy::new(100, Duration::from_millis(100));
        policy.record();
        assert!(!policy.is_finished());
        thread::sleep(Duration::from_millis(150));
        assert!(policy.is_finished());
    }

    #[rstest]
    fn concurrent_records_are_all_counted() {
        let (_, clock) = manual_clock(0);
        let policy = Arc::new(BatchPolicy::with_time_provider(
            10_000,
            Duration::from_secs(60),
            clock,
        ));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let policy = Arc::clone(&policy);
                thread::spawn(move || {
                    for _ in 0..250 {
                        policy.record();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("recorder thread panicked");
        }
        assert_eq!(policy.processed_items(), 1_000);
    }

    proptest! {
        #[test]
        fn finishes_exactly_at_size_threshold(size in 1usize..50, records in 1usize..200) {
            let (_, clock) = manual_clock(0);
            let policy = BatchPolicy::with_time_provider(size, Duration::from_secs(3600), clock);
            let mut in_batch = 0usize;
            for _ in 0..records {
                policy.record();
                in_batch += 1;
                let finished = policy.is_finished();
                prop_assert_eq!(finished, in_batch >= size);
                if finished {
                    in_batch = 0;
                }
            }
        }
    }
}

//! Buffered, batching writer.
//!
//! [`BufferedWriter`] queues events from any number of producer threads and
//! ships them in batches. A batch is flushed synchronously on the producer
//! thread once the queue reaches `max_buffered_items` or the previous flush is
//! older than `flush_interval`; a background thread covers idle periods.
//! Delivery failures trigger one reconnect and one retry, after which the
//! batch is dropped and logged. Nothing in this module returns an error to
//! producers.

mod config;
mod delivery;
mod flusher;


use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::{
    builder::BuildError,
    clock::{TimeProvider, system_time_provider},
    connection::{ConnectionError, ConnectionManager, ConnectionProvider},
    encoder::Encoder,
    rate_limited_warner::RateLimitedWarner,
};

pub use config::{
    DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_BUFFERED_ITEMS, DEFAULT_MAX_INIT_TRIES,
    DEFAULT_RETRY_INTERVAL, WriterConfig,
};
pub use delivery::DeliveryMethod;

use flusher::{FlusherHandle, spawn_flusher};

/// Delivery attempts per batch: the first send plus one retry after a
/// reconnect.
pub const SEND_ATTEMPTS: usize = 2;

/// Point-in-time copy of a writer's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Flushes performed, whatever triggered them.
    pub flushes: u64,
    /// Flushes performed by the background thread.
    pub background_flushes: u64,
    /// Events acknowledged by the backend.
    pub delivered: u64,
    /// Events discarded: queue full, closed writer, encoding failure or a
    /// batch that failed every attempt.
    pub dropped: u64,
    /// Individual delivery attempts that failed.
    pub send_failures: u64,
}

#[derive(Default)]
struct StatsCounters {
    flushes: AtomicU64,
    background_flushes: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    send_failures: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> WriterStats {
        WriterStats {
            flushes: self.flushes.load(Ordering::Relaxed),
            background_flushes: self.background_flushes.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

enum SendFailure {
    NoConnection,
    Backend(ConnectionError),
}

impl fmt::Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendFailure::NoConnection => f.write_str("no connection available"),
            SendFailure::Backend(err) => write!(f, "{err}"),
        }
    }
}

/// State shared between producers and the flusher thread.
pub(crate) struct WriterCore<E> {
    config: WriterConfig,
    encoder: Arc<dyn Encoder<E>>,
    connection: ConnectionManager,
    tx: Sender<E>,
    rx: Receiver<E>,
    send_lock: Mutex<()>,
    last_flush_ms: AtomicU64,
    shutdown: AtomicBool,
    stats: StatsCounters,
    warner: RateLimitedWarner,
    time_provider: TimeProvider,
}

impl<E> WriterCore<E> {
    fn now(&self) -> u64 {
        (self.time_provider)()
    }

    fn flush_interval_ms(&self) -> u64 {
        u64::try_from(self.config.flush_interval.as_millis()).unwrap_or(u64::MAX)
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Time left before the interval trigger fires; zero when overdue.
    fn time_until_flush_due(&self) -> Duration {
        let since = self
            .now()
            .saturating_sub(self.last_flush_ms.load(Ordering::Acquire));
        Duration::from_millis(self.flush_interval_ms().saturating_sub(since))
    }

    fn record_drops(&self, count: u64, reason: &str) {
        self.stats.dropped.fetch_add(count, Ordering::Relaxed);
        self.warner.record_drops(count);
        self.warner.warn_if_due(|total| {
            warn!("BufferedWriter: dropped {total} events ({reason})");
        });
    }

    fn append(&self, event: E) {
        if self.is_shutdown() {
            self.record_drops(1, "writer closed");
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.record_drops(1, "queue full"),
            Err(TrySendError::Disconnected(_)) => self.record_drops(1, "queue disconnected"),
        }
        if self.is_shutdown() {
            // close() started after the check above; its final flush may
            // already have drained the queue.
            self.settle_after_close();
            return;
        }
        if self.rx.len() >= self.config.max_buffered_items || self.time_until_flush_due().is_zero()
        {
            self.flush();
        }
    }

    /// Account for events enqueued while the writer was closing: ship them
    /// if the connection is still open, otherwise count them as dropped.
    fn settle_after_close(&self) {
        if !self.connection.is_closed() {
            self.flush();
            return;
        }
        let _serial = self.send_lock.lock();
        let stranded = self.rx.try_iter().count() as u64;
        if stranded > 0 {
            self.record_drops(stranded, "writer closed");
        }
    }

    /// Drain the queue and ship it. Returns `false` only when a non-empty
    /// batch was dropped after exhausting its attempts.
    fn flush(&self) -> bool {
        let _serial = self.send_lock.lock();
        let delivered = self.drain_and_send();
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        self.last_flush_ms.store(self.now(), Ordering::Release);
        delivered
    }

    fn drain_and_send(&self) -> bool {
        let values: Vec<String> = self
            .rx
            .try_iter()
            .filter_map(|event| match self.encoder.encode(&event) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!("BufferedWriter: dropping event that failed to encode: {err}");
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    None
                }
            })
            .collect();
        if values.is_empty() {
            return true;
        }
        for _ in 0..SEND_ATTEMPTS {
            let started = Instant::now();
            match self.send(&values) {
                Ok(()) => {
                    debug!(
                        "BufferedWriter: sent {} events to '{}' in {}ms",
                        values.len(),
                        self.config.destination_key,
                        started.elapsed().as_millis()
                    );
                    self.stats
                        .delivered
                        .fetch_add(values.len() as u64, Ordering::Relaxed);
                    return true;
                }
                Err(failure) => {
                    info!(
                        "BufferedWriter: unable to send {} events ({failure}); reconnecting",
                        values.len()
                    );
                    self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                    self.connection.reconnect();
                }
            }
        }
        warn!(
            "BufferedWriter: giving up on {} events for '{}' after {SEND_ATTEMPTS} attempts",
            values.len(),
            self.config.destination_key
        );
        self.stats
            .dropped
            .fetch_add(values.len() as u64, Ordering::Relaxed);
        false
    }

    fn send(&self, values: &[String]) -> Result<(), SendFailure> {
        let mut handle = self
            .connection
            .dispatch_handle()
            .ok_or(SendFailure::NoConnection)?;
        self.config
            .delivery_method
            .send(&mut *handle, &self.config.destination_key, values)
            .map_err(SendFailure::Backend)
    }
}

/// Batching writer shipping encoded events to a Redis list or channel.
///
/// `append` never blocks on the network unless the call itself triggers a
/// flush, and never reports an error. Call [`close`](Self::close) (or drop the
/// writer) at shutdown so queued events get their final delivery attempt.
pub struct BufferedWriter<E: Send + 'static> {
    core: Arc<WriterCore<E>>,
    flusher: Mutex<Option<FlusherHandle>>,
}

impl<E: Send + 'static> BufferedWriter<E> {
    /// Start a writer: connect (retrying in the background as configured) and
    /// spawn the flusher thread.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::InvalidConfig`] when `config` fails
    /// [`WriterConfig::validate`], and [`BuildError::Io`] if the flusher
    /// thread cannot be spawned.
    pub fn new(
        config: WriterConfig,
        encoder: Arc<dyn Encoder<E>>,
        provider: Arc<dyn ConnectionProvider>,
    ) -> Result<Self, BuildError> {
        Self::with_time_provider(config, encoder, provider, system_time_provider())
    }

    pub(crate) fn with_time_provider(
        config: WriterConfig,
        encoder: Arc<dyn Encoder<E>>,
        provider: Arc<dyn ConnectionProvider>,
        time_provider: TimeProvider,
    ) -> Result<Self, BuildError> {
        config.validate()?;
        if config.size_trigger_unreachable() {
            warn!(
                "BufferedWriter: queue_capacity {:?} is below max_buffered_items {}; \
                 only the interval flush will ship batches",
                config.queue_capacity, config.max_buffered_items
            );
        }
        let (tx, rx) = match config.queue_capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };
        let connection = ConnectionManager::new(provider, config.retry_interval);
        let warner = RateLimitedWarner::with_time_provider(
            config.warn_interval,
            Arc::clone(&time_provider),
        );
        let core = Arc::new(WriterCore {
            last_flush_ms: AtomicU64::new(time_provider()),
            encoder,
            connection,
            tx,
            rx,
            send_lock: Mutex::new(()),
            shutdown: AtomicBool::new(false),
            stats: StatsCounters::default(),
            warner,
            time_provider,
            config,
        });
        core.connection.initialize(core.config.max_init_tries);
        let flusher = spawn_flusher(Arc::clone(&core))?;
        debug!(
            "BufferedWriter: started for '{}' using {}",
            core.config.destination_key, core.config.delivery_method
        );
        Ok(Self {
            core,
            flusher: Mutex::new(Some(flusher)),
        })
    }

    /// Queue `event`; `None` is ignored.
    ///
    /// Flushes on the calling thread when the queue is full enough or the
    /// last flush is too old.
    pub fn append(&self, event: impl Into<Option<E>>) {
        if let Some(event) = event.into() {
            self.core.append(event);
        }
    }

    /// Drain and ship everything queued so far.
    ///
    /// Returns `false` when the batch was dropped after its delivery attempts
    /// failed.
    pub fn flush(&self) -> bool {
        self.core.warner.flush(|count| {
            warn!("BufferedWriter: dropped {count} events in the last interval");
        });
        self.core.flush()
    }

    /// Stop the flusher, make one final delivery attempt and close the
    /// connection. Later calls do nothing.
    pub fn close(&self) {
        let core = &self.core;
        if core.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(
            "BufferedWriter: closing writer for '{}'",
            core.config.destination_key
        );
        if let Some(flusher) = self.flusher.lock().take() {
            flusher.stop();
        }
        core.flush();
        core.connection.close();
        core.warner.flush(|count| {
            warn!("BufferedWriter: dropped {count} events before close");
        });
    }

    pub fn stats(&self) -> WriterStats {
        self.core.stats.snapshot()
    }

    /// Events currently waiting in the queue.
    pub fn pending(&self) -> usize {
        self.core.rx.len()
    }

    pub fn config(&self) -> &WriterConfig {
        &self.core.config
    }

    pub fn is_connected(&self) -> bool {
        self.core.connection.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_shutdown()
    }
}

impl<E: Send + 'static> Drop for BufferedWriter<E> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<E: Send + 'static> fmt::Debug for BufferedWriter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedWriter")
            .field("config", &self.core.config)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

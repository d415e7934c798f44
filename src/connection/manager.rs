//! Ownership of the single backend handle.
//!
//! [`ConnectionManager`] acquires the handle lazily, retries failed
//! initialisation on a background thread at a fixed interval, and replaces the
//! handle on demand when the flush path reports a send failure. Callers never
//! keep the handle: each use goes through [`ConnectionManager::dispatch_handle`],
//! which borrows it under the manager's lock for the duration of one send.

use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use log::{debug, info, warn};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use super::{BackendConnection, ConnectionProvider};

/// Shortest pause the retry loop honours between acquisition attempts.
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// How many acquisition attempts initialisation may make.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryLimit {
    /// Give up after this many attempts (at least one).
    Bounded(u32),
    /// Keep retrying until a handle is obtained or the manager closes.
    Unbounded,
}

impl RetryLimit {
    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows_another(self, attempts: u32) -> bool {
        match self {
            RetryLimit::Bounded(max) => attempts < max,
            RetryLimit::Unbounded => true,
        }
    }
}

impl Default for RetryLimit {
    fn default() -> Self {
        RetryLimit::Bounded(5)
    }
}

impl fmt::Display for RetryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryLimit::Bounded(max) => write!(f, "{max}"),
            RetryLimit::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// Exclusive borrow of the live backend handle.
///
/// Holding this value blocks reconnects and retry installs, so drop it before
/// calling [`ConnectionManager::reconnect`].
pub struct DispatchHandle<'a> {
    inner: MappedMutexGuard<'a, dyn BackendConnection + 'static>,
}

impl Deref for DispatchHandle<'_> {
    type Target = dyn BackendConnection;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl DerefMut for DispatchHandle<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.inner
    }
}

struct ManagerShared {
    provider: Arc<dyn ConnectionProvider>,
    slot: Mutex<Option<Box<dyn BackendConnection>>>,
    initializing: AtomicBool,
    shutdown: AtomicBool,
    retry_interval: Duration,
}

impl ManagerShared {
    fn acquire(&self) -> Option<Box<dyn BackendConnection>> {
        match self.provider.connect() {
            Ok(conn) => Some(conn),
            Err(err) => {
                warn!("ConnectionManager: failed to acquire connection: {err}");
                None
            }
        }
    }

    /// Store `conn` as the live handle unless the manager has shut down.
    fn install(&self, conn: Box<dyn BackendConnection>) -> bool {
        let mut slot = self.slot.lock();
        if self.shutdown.load(Ordering::Acquire) {
            drop(slot);
            close_quietly(conn);
            return false;
        }
        if let Some(previous) = slot.replace(conn) {
            close_quietly(previous);
        }
        true
    }
}

struct RetryTask {
    cancel: Sender<()>,
    thread: thread::JoinHandle<()>,
}

/// Owner of the single backend handle and its retry schedule.
pub struct ConnectionManager {
    shared: Arc<ManagerShared>,
    retry: Mutex<Option<RetryTask>>,
    reconnect_lock: Mutex<()>,
}

impl ConnectionManager {
    /// Create a manager drawing handles from `provider`. No connection is
    /// attempted until [`initialize`](Self::initialize) is called.
    ///
    /// `retry_interval` is raised to [`MIN_RETRY_INTERVAL`] if shorter.
    pub fn new(provider: Arc<dyn ConnectionProvider>, retry_interval: Duration) -> Self {
        let retry_interval = retry_interval.max(MIN_RETRY_INTERVAL);
        Self {
            shared: Arc::new(ManagerShared {
                provider,
                slot: Mutex::new(None),
                initializing: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                retry_interval,
            }),
            retry: Mutex::new(None),
            reconnect_lock: Mutex::new(()),
        }
    }

    /// Make one acquisition attempt and, if it fails and `limit` allows it,
    /// continue retrying on a background thread every `retry_interval`.
    ///
    /// [`reconnect`](Self::reconnect) is a no-op until initialisation has
    /// finished, successfully or not. Calling this while a previous
    /// initialisation is still running does nothing.
    pub fn initialize(&self, limit: RetryLimit) {
        let shared = &self.shared;
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        if shared.initializing.swap(true, Ordering::AcqRel) {
            debug!("ConnectionManager: initialisation already in progress");
            return;
        }
        if let Some(conn) = shared.acquire() {
            shared.install(conn);
            shared.initializing.store(false, Ordering::Release);
            return;
        }
        if !limit.allows_another(1) {
            warn!("ConnectionManager: giving up after 1 connection attempt");
            shared.initializing.store(false, Ordering::Release);
            return;
        }
        info!(
            "ConnectionManager: retrying connection every {:?} (max tries: {limit})",
            shared.retry_interval
        );
        let (cancel_tx, cancel_rx) = bounded(1);
        let retry_shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name("redis-connection-retry".into())
            .spawn(move || retry_loop(&retry_shared, limit, &cancel_rx));
        match spawned {
            Ok(thread) => {
                *self.retry.lock() = Some(RetryTask {
                    cancel: cancel_tx,
                    thread,
                });
            }
            Err(err) => {
                warn!("ConnectionManager: failed to spawn retry thread: {err}");
                shared.initializing.store(false, Ordering::Release);
            }
        }
    }

    /// Borrow the live handle, or `None` while no connection is available.
    pub fn dispatch_handle(&self) -> Option<DispatchHandle<'_>> {
        let slot = self.shared.slot.lock();
        MutexGuard::try_map(slot, |slot| slot.as_deref_mut())
            .ok()
            .map(|inner| DispatchHandle { inner })
    }

    /// Discard the current handle and make exactly one fresh acquisition
    /// attempt.
    ///
    /// Does nothing while initialisation is still in progress or after
    /// [`close`](Self::close). Concurrent calls are serialised.
    pub fn reconnect(&self) {
        let shared = &self.shared;
        if shared.initializing.load(Ordering::Acquire) {
            debug!("ConnectionManager: reconnect skipped; initialisation in progress");
            return;
        }
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        let _serial = self.reconnect_lock.lock();
        let previous = shared.slot.lock().take();
        if let Some(previous) = previous {
            close_quietly(previous);
        }
        info!("ConnectionManager: reconnecting");
        if let Some(conn) = shared.acquire()
            && shared.install(conn)
        {
            info!("ConnectionManager: reconnected");
        }
    }

    /// True while the initial acquisition or its retry loop is running.
    pub fn is_initializing(&self) -> bool {
        self.shared.initializing.load(Ordering::Acquire)
    }

    /// True when a handle is currently held.
    pub fn is_connected(&self) -> bool {
        self.shared.slot.lock().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Cancel any pending retry, close the handle and the provider.
    ///
    /// Safe to call more than once; only the first call has an effect.
    pub fn close(&self) {
        let shared = &self.shared;
        if shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.retry.lock().take() {
            let _ = task.cancel.try_send(());
            drop(task.cancel);
            if task.thread.join().is_err() {
                warn!("ConnectionManager: retry thread panicked");
            }
        }
        let current = shared.slot.lock().take();
        if let Some(conn) = current {
            close_quietly(conn);
        }
        shared.provider.close();
        debug!("ConnectionManager: closed");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("retry_interval", &self.shared.retry_interval)
            .field("initializing", &self.is_initializing())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn retry_loop(shared: &ManagerShared, limit: RetryLimit, cancel: &Receiver<()>) {
    let mut attempts: u32 = 1;
    loop {
        match cancel.recv_timeout(shared.retry_interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        attempts = attempts.saturating_add(1);
        if let Some(conn) = shared.acquire() {
            if shared.install(conn) {
                info!("ConnectionManager: connected after {attempts} attempts");
            }
            break;
        }
        if !limit.allows_another(attempts) {
            warn!("ConnectionManager: giving up after {attempts} connection attempts");
            break;
        }
    }
    shared.initializing.store(false, Ordering::Release);
}

fn close_quietly(mut conn: Box<dyn BackendConnection>) {
    if let Err(err) = conn.close() {
        debug!("ConnectionManager: ignoring error while closing connection: {err}");
    }
}

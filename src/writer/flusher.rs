//! Background thread flushing idle writers.

use std::{io, sync::Arc, sync::atomic::Ordering, thread};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use log::warn;

use super::WriterCore;

/// Owner of the flusher thread.
pub(crate) struct FlusherHandle {
    wake: Sender<()>,
    thread: thread::JoinHandle<()>,
}

impl FlusherHandle {
    /// Wake the thread and wait for it to exit. The writer's shutdown flag
    /// must already be set.
    pub(crate) fn stop(self) {
        let _ = self.wake.try_send(());
        drop(self.wake);
        if self.thread.join().is_err() {
            warn!("BufferedWriter: flusher thread panicked");
        }
    }
}

pub(crate) fn spawn_flusher<E: Send + 'static>(
    core: Arc<WriterCore<E>>,
) -> io::Result<FlusherHandle> {
    let (wake_tx, wake_rx) = bounded(1);
    let thread = thread::Builder::new()
        .name("redis-batch-flusher".into())
        .spawn(move || flush_periodically(&core, &wake_rx))?;
    Ok(FlusherHandle {
        wake: wake_tx,
        thread,
    })
}

/// Sleep until the next flush deadline, flush, repeat. The deadline is
/// recomputed after every wake-up because producers may have flushed in the
/// meantime.
fn flush_periodically<E>(core: &WriterCore<E>, wake: &Receiver<()>) {
    while !core.is_shutdown() {
        let wait = core.time_until_flush_due();
        if wait.is_zero() {
            core.flush();
            core.stats
                .background_flushes
                .fetch_add(1, Ordering::Relaxed);
            continue;
        }
        match wake.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

//! In-memory backend doubles with scripted failures.
//!
//! A [`ScriptedProvider`] hands out [`ScriptedConnection`]s that record every
//! delivered value in a shared [`Script`], so tests can assert on what reached
//! the "backend" and how often connections were opened.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::connection::{BackendConnection, ConnectionError, ConnectionProvider};

/// One delivery call observed by the fake backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    Rpush { key: String, values: Vec<String> },
    Publish { channel: String, message: String },
}

/// Shared record of what the fake backend saw, plus failure knobs.
#[derive(Default)]
pub struct Script {
    connect_failures: AtomicUsize,
    send_failures: AtomicUsize,
    connect_attempts: AtomicUsize,
    send_attempts: AtomicUsize,
    connection_closes: AtomicUsize,
    provider_closed: AtomicBool,
    deliveries: Mutex<Vec<Delivery>>,
}

impl Script {
    /// Make the next `count` connect attempts fail.
    pub fn fail_connects(&self, count: usize) {
        self.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` delivery calls fail.
    pub fn fail_sends(&self, count: usize) {
        self.send_failures.store(count, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    pub fn connection_closes(&self) -> usize {
        self.connection_closes.load(Ordering::SeqCst)
    }

    pub fn provider_closed(&self) -> bool {
        self.provider_closed.load(Ordering::SeqCst)
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// Every value delivered so far, flattened in arrival order.
    pub fn delivered_values(&self) -> Vec<String> {
        self.deliveries
            .lock()
            .iter()
            .flat_map(|delivery| match delivery {
                Delivery::Rpush { values, .. } => values.clone(),
                Delivery::Publish { message, .. } => vec![message.clone()],
            })
            .collect()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn deliver(&self, delivery: Delivery) -> Result<(), ConnectionError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.send_failures) {
            return Err(ConnectionError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "scripted send failure",
            )));
        }
        self.deliveries.lock().push(delivery);
        Ok(())
    }
}

/// Provider whose behaviour is driven by a shared [`Script`].
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    script: Arc<Script>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self) -> Arc<Script> {
        Arc::clone(&self.script)
    }
}

impl ConnectionProvider for ScriptedProvider {
    fn connect(&self) -> Result<Box<dyn BackendConnection>, ConnectionError> {
        self.script.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.script.provider_closed() {
            return Err(ConnectionError::Closed);
        }
        if Script::take_failure(&self.script.connect_failures) {
            return Err(ConnectionError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "scripted connect failure",
            )));
        }
        Ok(Box::new(ScriptedConnection {
            script: Arc::clone(&self.script),
        }))
    }

    fn close(&self) {
        self.script.provider_closed.store(true, Ordering::SeqCst);
    }
}

/// Connection recording deliveries into its provider's [`Script`].
pub struct ScriptedConnection {
    script: Arc<Script>,
}

impl BackendConnection for ScriptedConnection {
    fn rpush(&mut self, key: &str, values: &[String]) -> Result<(), ConnectionError> {
        self.script.deliver(Delivery::Rpush {
            key: key.to_owned(),
            values: values.to_vec(),
        })
    }

    fn publish(&mut self, channel: &str, message: &str) -> Result<(), ConnectionError> {
        self.script.deliver(Delivery::Publish {
            channel: channel.to_owned(),
            message: message.to_owned(),
        })
    }

    fn close(&mut self) -> Result<(), ConnectionError> {
        self.script.connection_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

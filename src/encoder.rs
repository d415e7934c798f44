//! Event encoders turning queued events into wire-ready strings.
//!
//! The writer calls [`Encoder::encode`] once per drained event. An encoding
//! failure only affects the offending event; the rest of the batch is still
//! delivered.

use std::{fmt, marker::PhantomData, time::SystemTime};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::event::LogEvent;

/// Error produced when an event cannot be rendered.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialise event as json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event cannot be encoded: {0}")]
    Invalid(String),
}

/// Trait for rendering events into strings.
///
/// Implementors must be thread-safe because encoding runs on whichever thread
/// triggers a flush: a producer or the background flusher.
pub trait Encoder<E>: Send + Sync {
    fn encode(&self, event: &E) -> Result<String, EncodeError>;
}

impl<E, F> Encoder<E> for F
where
    F: Fn(&E) -> Result<String, EncodeError> + Send + Sync,
{
    fn encode(&self, event: &E) -> Result<String, EncodeError> {
        self(event)
    }
}

/// Encoder using the event's [`Display`](fmt::Display) implementation.
pub struct DisplayEncoder<E>(PhantomData<fn(&E)>);

impl<E> DisplayEncoder<E> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<E> Default for DisplayEncoder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: fmt::Display> Encoder<E> for DisplayEncoder<E> {
    fn encode(&self, event: &E) -> Result<String, EncodeError> {
        Ok(event.to_string())
    }
}

#[derive(Serialize)]
struct SerializableEvent<'a> {
    #[serde(rename = "@timestamp")]
    timestamp: String,
    level: &'static str,
    logger: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread: Option<&'a str>,
    #[serde(skip_serializing_if = "str::is_empty")]
    module: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    file: &'a str,
    #[serde(skip_serializing_if = "is_zero")]
    line: u32,
    #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    mdc: &'a std::collections::BTreeMap<String, String>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

fn format_timestamp(timestamp: SystemTime) -> String {
    DateTime::<Utc>::from(timestamp).to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl<'a> From<&'a LogEvent> for SerializableEvent<'a> {
    fn from(event: &'a LogEvent) -> Self {
        Self {
            timestamp: format_timestamp(event.metadata.timestamp),
            level: event.level.as_str(),
            logger: &event.logger,
            message: &event.message,
            thread: event.metadata.thread_name.as_deref(),
            module: &event.metadata.module_path,
            file: &event.metadata.filename,
            line: event.metadata.line_number,
            mdc: &event.metadata.key_values,
        }
    }
}

/// Renders a [`LogEvent`] as a single-line JSON document.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEncoder;

impl Encoder<LogEvent> for JsonEncoder {
    fn encode(&self, event: &LogEvent) -> Result<String, EncodeError> {
        Ok(serde_json::to_string(&SerializableEvent::from(event))?)
    }
}

//! Compatibility bridge for the Rust `log` crate.
//!
//! This module provides `RedisLogAdapter`, an implementation of `log::Log`
//! that turns `log` records into [`LogEvent`]s and appends them to a
//! [`BufferedWriter`]. Installing it as the global logger ships an
//! application's ordinary `log` output to Redis.
//!
//! Records emitted by this crate itself are never forwarded: the writer logs
//! its own failures through `log`, and feeding those back into the writer
//! could recurse into a flush that is already running.

use std::sync::OnceLock;
use std::thread;
use std::time::SystemTime;

use log::{LevelFilter, Metadata, Record};

use crate::event::{EventMetadata, Level, LogEvent};
use crate::writer::BufferedWriter;

const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

/// Adapter implementing the Rust `log::Log` trait on top of a writer.
pub struct RedisLogAdapter {
    writer: BufferedWriter<LogEvent>,
    level: LevelFilter,
}

impl RedisLogAdapter {
    /// Forward records at or above `level` to `writer`.
    pub fn new(writer: BufferedWriter<LogEvent>, level: LevelFilter) -> Self {
        Self { writer, level }
    }

    pub fn writer(&self) -> &BufferedWriter<LogEvent> {
        &self.writer
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }
}

fn is_own_target(target: &str) -> bool {
    target
        .strip_prefix(OWN_TARGET)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

fn to_event(record: &Record<'_>) -> LogEvent {
    let metadata = EventMetadata {
        module_path: record.module_path().unwrap_or_default().to_string(),
        filename: record.file().unwrap_or_default().to_string(),
        line_number: record.line().unwrap_or(0),
        timestamp: SystemTime::now(),
        thread_name: thread::current().name().map(ToString::to_string),
        ..Default::default()
    };
    LogEvent::with_metadata(
        record.target(),
        Level::from(record.level()),
        &record.args().to_string(),
        metadata,
    )
}

impl log::Log for RedisLogAdapter {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level && !is_own_target(metadata.target())
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.writer.append(to_event(record));
    }

    fn flush(&self) {
        self.writer.flush();
    }
}

static INSTALLED: OnceLock<&'static RedisLogAdapter> = OnceLock::new();

/// Install `adapter` as the global Rust logger.
///
/// Returns `true` on success. When a global logger is already set,
/// installation fails, the adapter's writer is closed and `false` is
/// returned.
pub fn install_global_logger(adapter: RedisLogAdapter) -> bool {
    if INSTALLED.get().is_some() {
        adapter.writer.close();
        return false;
    }
    let level = adapter.level;
    let adapter: &'static RedisLogAdapter = Box::leak(Box::new(adapter));
    if log::set_logger(adapter).is_err() {
        adapter.writer.close();
        return false;
    }
    let _ = INSTALLED.set(adapter);
    log::set_max_level(level);
    true
}

/// The adapter installed by [`install_global_logger`], if any.
pub fn installed_logger() -> Option<&'static RedisLogAdapter> {
    INSTALLED.get().copied()
}

/// Stop forwarding records and close the installed writer so queued events
/// get their final delivery attempt. Call this before the process exits.
pub fn shutdown_global_logger() {
    if let Some(adapter) = installed_logger() {
        log::set_max_level(LevelFilter::Off);
        adapter.writer.close();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use log::Log;
    use rstest::rstest;
    use serde_json::Value;

    use super::*;
    use crate::{
        connection::RetryLimit,
        encoder::JsonEncoder,
        test_utils::ScriptedProvider,
        writer::WriterConfig,
    };

    fn adapter(provider: &ScriptedProvider, level: LevelFilter) -> RedisLogAdapter {
        let config = WriterConfig {
            max_buffered_items: 100,
            flush_interval: Duration::from_secs(3600),
            max_init_tries: RetryLimit::Bounded(1),
            ..WriterConfig::new("app")
        };
        let writer = BufferedWriter::<LogEvent>::new(
            config,
            Arc::new(JsonEncoder),
            Arc::new(provider.clone()),
        )
        .expect("start writer");
        RedisLogAdapter::new(writer, level)
    }

    fn emit(adapter: &RedisLogAdapter, target: &str, level: log::Level, message: &str) {
        adapter.log(
            &Record::builder()
                .target(target)
                .level(level)
                .args(format_args!("{message}"))
                .module_path(Some("app::service"))
                .file(Some("src/service.rs"))
                .line(Some(42))
                .build(),
        );
    }

    #[rstest]
    #[case("redis_batch_appender", true)]
    #[case("redis_batch_appender::writer", true)]
    #[case("redis_batch_appender_extra", false)]
    #[case("app", false)]
    fn recognises_own_targets(#[case] target: &str, #[case] expected: bool) {
        assert_eq!(is_own_target(target), expected);
    }

    #[rstest]
    fn forwards_records_as_json_events() {
        let provider = ScriptedProvider::new();
        let adapter = adapter(&provider, LevelFilter::Info);
        emit(&adapter, "app::service", log::Level::Warn, "disk almost full");
        adapter.flush();

        let values = provider.script().delivered_values();
        assert_eq!(values.len(), 1);
        let json: Value = serde_json::from_str(&values[0]).expect("valid json");
        assert_eq!(json["level"], "WARN");
        assert_eq!(json["logger"], "app::service");
        assert_eq!(json["message"], "disk almost full");
        assert_eq!(json["module"], "app::service");
        assert_eq!(json["file"], "src/service.rs");
        assert_eq!(json["line"], 42);
    }

    #[rstest]
    fn filters_by_level_and_own_target() {
        let provider = ScriptedProvider::new();
        let adapter = adapter(&provider, LevelFilter::Info);
        emit(&adapter, "app", log::Level::Debug, "too chatty");
        emit(&adapter, "redis_batch_appender::writer", log::Level::Warn, "internal");
        assert_eq!(adapter.writer().pending(), 0);

        emit(&adapter, "app", log::Level::Error, "kept");
        assert_eq!(adapter.writer().pending(), 1);
    }
}

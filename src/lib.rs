//! Batched shipping of log events to Redis.
//!
//! Producers call [`BufferedWriter::append`]; events are queued and shipped in
//! batches either as one `RPUSH` per batch or one `PUBLISH` per event. A
//! background thread flushes idle queues, failed deliveries are retried once
//! after a reconnect, and nothing on the producer path ever returns an error.
//!
//! ```no_run
//! use redis_batch_appender::{LogEvent, Level, WriterBuilder};
//!
//! let writer = WriterBuilder::new()
//!     .with_node("localhost", 6379)
//!     .with_key("app-logs")
//!     .build_json()?;
//! writer.append(LogEvent::new("app", Level::Info, "started"));
//! writer.close();
//! # Ok::<(), redis_batch_appender::BuildError>(())
//! ```

pub mod batch_policy;
pub mod builder;
pub mod clock;
pub mod connection;
pub mod encoder;
pub mod event;
pub mod file_config;
#[cfg(feature = "log-compat")]
pub mod log_compat;
pub mod rate_limited_warner;
pub mod writer;

#[cfg(test)]
mod test_utils;

pub use batch_policy::BatchPolicy;
pub use builder::{BuildError, WriterBuilder};
pub use connection::{
    BackendConnection, ConnectionError, ConnectionManager, ConnectionProvider,
    RedisConnectionConfig, RedisConnectionProvider, RedisScheme, RetryLimit,
};
pub use encoder::{DisplayEncoder, EncodeError, Encoder, JsonEncoder};
pub use event::{Level, LogEvent};
pub use file_config::{builder_from_ini_file, builder_from_ini_str};
#[cfg(feature = "log-compat")]
pub use log_compat::{
    RedisLogAdapter, install_global_logger, installed_logger, shutdown_global_logger,
};
pub use writer::{BufferedWriter, DeliveryMethod, WriterConfig, WriterStats};

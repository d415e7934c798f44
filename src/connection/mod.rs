//! Backend connectivity.
//!
//! The writer only ever talks to [`ConnectionManager`], which owns one
//! [`BackendConnection`] obtained from a [`ConnectionProvider`]. The default
//! provider, [`RedisConnectionProvider`], speaks RESP2 over TCP, TLS or a unix
//! socket and can discover the master through a sentinel set.

mod config;
mod error;
mod manager;
mod provider;
mod redis;
pub(crate) mod resp;
mod transport;


pub use config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_HOST, DEFAULT_IO_TIMEOUT, DEFAULT_PORT,
    DEFAULT_SENTINEL_PORT, RedisConnectionConfig, RedisScheme, SentinelAddr, parse_sentinels,
};
pub use error::ConnectionError;
pub use manager::{ConnectionManager, DispatchHandle, MIN_RETRY_INTERVAL, RetryLimit};
pub use provider::{ConnectionProvider, RedisConnectionProvider};
pub use redis::RedisConnection;
pub use transport::TlsOptions;

/// A live, single-threaded handle to the backend store.
///
/// Implementations are not expected to be safe for concurrent use; the
/// manager serialises every call.
pub trait BackendConnection: Send {
    /// Append `values` to the list `key` in one round trip, preserving order.
    fn rpush(&mut self, key: &str, values: &[String]) -> Result<(), ConnectionError>;

    /// Publish one `message` on `channel`.
    fn publish(&mut self, channel: &str, message: &str) -> Result<(), ConnectionError>;

    /// Release the handle. Errors are reported but the handle is unusable
    /// afterwards either way.
    fn close(&mut self) -> Result<(), ConnectionError>;
}

//! Errors raised while acquiring or using a backend connection.

use std::io;

use thiserror::Error;

/// Failure reported by a [`ConnectionProvider`](super::ConnectionProvider)
/// or a [`BackendConnection`](super::BackendConnection).
///
/// These errors never escape the writer; they are logged and fed into the
/// reconnect path.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Socket level failure (refused, reset, timed out, TLS).
    #[error("connection i/o failed: {0}")]
    Io(#[from] io::Error),
    /// The server answered with an error reply.
    #[error("server replied with error: {0}")]
    Server(String),
    /// The server reply could not be understood.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// No sentinel could name a master for the configured master name.
    #[error("no sentinel knows a master named '{0}'")]
    MasterNotFound(String),
    /// The provider was closed and refuses new connections.
    #[error("connection provider is closed")]
    Closed,
}

//! Factories producing ready-to-use backend connections.

use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;

use super::{
    BackendConnection,
    config::{RedisConnectionConfig, RedisScheme},
    error::ConnectionError,
    redis::{RedisConnection, SessionSetup, resolve_master},
    transport::{RedisTransport, TcpEndpoint},
};

/// Produces backend handles on demand.
///
/// The [`ConnectionManager`](super::ConnectionManager) calls
/// [`connect`](Self::connect) whenever it needs a fresh handle and
/// [`close`](Self::close) once at shutdown.
pub trait ConnectionProvider: Send + Sync {
    /// Open a usable connection or report why none is available.
    fn connect(&self) -> Result<Box<dyn BackendConnection>, ConnectionError>;

    /// Release provider-wide resources. Later `connect` calls should fail.
    fn close(&self);
}

/// Provider opening [`RedisConnection`]s for a node, sentinel set or unix
/// socket.
pub struct RedisConnectionProvider {
    config: RedisConnectionConfig,
    closed: AtomicBool,
}

impl RedisConnectionProvider {
    pub fn new(config: RedisConnectionConfig) -> Self {
        Self {
            config,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RedisConnectionConfig {
        &self.config
    }

    fn data_transport(&self) -> Result<RedisTransport, ConnectionError> {
        let cfg = &self.config;
        match &cfg.scheme {
            RedisScheme::Node { host, port } => Ok(RedisTransport::Tcp(TcpEndpoint {
                host: host.clone(),
                port: *port,
                tls: cfg.tls.clone(),
            })),
            RedisScheme::Sentinel {
                sentinels,
                master_name,
            } => {
                let (host, port) =
                    resolve_master(sentinels, master_name, cfg.connect_timeout, cfg.io_timeout)?;
                debug!("RedisConnectionProvider: master '{master_name}' is at {host}:{port}");
                let tls = cfg.tls.clone().map(|mut tls| {
                    if tls.domain.is_empty() {
                        tls.domain = host.clone();
                    }
                    tls
                });
                Ok(RedisTransport::Tcp(TcpEndpoint { host, port, tls }))
            }
            RedisScheme::Unix { path } => Ok(RedisTransport::Unix(path.clone())),
        }
    }
}

impl ConnectionProvider for RedisConnectionProvider {
    fn connect(&self) -> Result<Box<dyn BackendConnection>, ConnectionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ConnectionError::Closed);
        }
        let transport = self.data_transport()?;
        let setup = SessionSetup {
            password: self.config.password.as_deref(),
            database: self.config.database,
        };
        let conn = RedisConnection::open(
            &transport,
            self.config.connect_timeout,
            self.config.io_timeout,
            &setup,
        )?;
        Ok(Box::new(conn))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for RedisConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnectionProvider")
            .field("scheme", &self.config.scheme)
            .field("database", &self.config.database)
            .field("tls", &self.config.tls.is_some())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

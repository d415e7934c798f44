//! Backend topology and session settings.
//!
//! `WriterBuilder` assembles these values; the provider consumes them when it
//! opens a connection.

use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use super::transport::TlsOptions;

/// Default Redis host.
pub const DEFAULT_HOST: &str = "localhost";
/// Default Redis port.
pub const DEFAULT_PORT: u16 = 6379;
/// Default port assumed for sentinel entries without one.
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;
/// Default timeout for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
/// Default timeout for individual socket reads and writes.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(2);

/// Address of one sentinel process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentinelAddr {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for SentinelAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for SentinelAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let entry = s.trim();
        if entry.is_empty() {
            return Err("sentinel address must not be empty".into());
        }
        match entry.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid sentinel port in '{entry}'"))?;
                Ok(Self {
                    host: host.trim().to_owned(),
                    port,
                })
            }
            None => Ok(Self {
                host: entry.to_owned(),
                port: DEFAULT_SENTINEL_PORT,
            }),
        }
    }
}

/// Parse a comma separated sentinel list such as `"a:26379, b:26380"`.
pub fn parse_sentinels(list: &str) -> Result<Vec<SentinelAddr>, String> {
    list.split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// How the backend is reached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedisScheme {
    /// A single node addressed directly.
    Node { host: String, port: u16 },
    /// A master discovered through a sentinel set.
    Sentinel {
        sentinels: Vec<SentinelAddr>,
        master_name: String,
    },
    /// A node listening on a unix domain socket.
    Unix { path: PathBuf },
}

impl Default for RedisScheme {
    fn default() -> Self {
        Self::Node {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
        }
    }
}

/// Everything needed to open and prepare one backend session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedisConnectionConfig {
    pub scheme: RedisScheme,
    pub password: Option<String>,
    pub database: u32,
    /// TLS settings; applied to the data connection only, never to sentinels.
    pub tls: Option<TlsOptions>,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
}

impl Default for RedisConnectionConfig {
    fn default() -> Self {
        Self {
            scheme: RedisScheme::default(),
            password: None,
            database: 0,
            tls: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

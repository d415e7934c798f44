//! Builder for [`BufferedWriter`].
//!
//! Collects topology, session, batching and retry settings, validates them in
//! one place and produces the immutable [`WriterConfig`] and
//! [`RedisConnectionConfig`] consumed at runtime. Invalid combinations fail
//! here rather than surfacing later as silent delivery failures.

use std::{io, path::PathBuf, sync::Arc, time::Duration};

use thiserror::Error;

use crate::{
    connection::{
        ConnectionProvider, DEFAULT_HOST, DEFAULT_PORT, RedisConnectionConfig,
        RedisConnectionProvider, RedisScheme, RetryLimit, TlsOptions, parse_sentinels,
    },
    encoder::{Encoder, JsonEncoder},
    event::LogEvent,
    writer::{BufferedWriter, DeliveryMethod, WriterConfig},
};

/// Errors that may occur while building a writer.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Invalid user supplied configuration.
    #[error("invalid writer configuration: {0}")]
    InvalidConfig(String),
    /// Underlying I/O error whilst starting the writer or reading its
    /// configuration.
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Clone, Debug)]
enum TopologyConfig {
    Node { host: String, port: u16 },
    Sentinel { sentinels: String, master_name: String },
    Unix { path: PathBuf },
}

impl Default for TopologyConfig {
    fn default() -> Self {
        TopologyConfig::Node {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct TlsConfig {
    domain: Option<String>,
    insecure: bool,
}

macro_rules! ensure_positive {
    ($value:expr, $field:expr) => {{
        if $value == 0 {
            Err(BuildError::InvalidConfig(format!(
                "{} must be greater than zero",
                $field
            )))
        } else {
            Ok($value)
        }
    }};
}

macro_rules! option_setter {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }
    };
}

/// Builder for constructing [`BufferedWriter`] instances.
#[derive(Clone, Debug, Default)]
pub struct WriterBuilder {
    topology: TopologyConfig,
    password: Option<String>,
    database: Option<u32>,
    tls: Option<TlsConfig>,
    connect_timeout_ms: Option<u64>,
    io_timeout_ms: Option<u64>,
    key: Option<String>,
    delivery_method: Option<DeliveryMethod>,
    max_buffered_items: Option<usize>,
    flush_interval_ms: Option<u64>,
    max_init_tries: Option<RetryLimit>,
    retry_interval_ms: Option<u64>,
    queue_capacity: Option<usize>,
    warn_interval_ms: Option<u64>,
}

impl WriterBuilder {
    /// Create a builder targeting `localhost:6379` with default batching.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect directly to one Redis node.
    pub fn with_node(mut self, host: impl Into<String>, port: u16) -> Self {
        self.topology = TopologyConfig::Node {
            host: host.into(),
            port,
        };
        self
    }

    /// Discover the master through sentinels given as `"host:port, host:port"`.
    pub fn with_sentinels(
        mut self,
        sentinels: impl Into<String>,
        master_name: impl Into<String>,
    ) -> Self {
        self.topology = TopologyConfig::Sentinel {
            sentinels: sentinels.into(),
            master_name: master_name.into(),
        };
        self
    }

    /// Connect through a unix domain socket.
    pub fn with_unix_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.topology = TopologyConfig::Unix { path: path.into() };
        self
    }

    /// Configure TLS using the provided domain and validation policy. The
    /// domain defaults to the node host.
    pub fn with_tls(mut self, domain: Option<String>, insecure: bool) -> Self {
        self.tls = Some(TlsConfig { domain, insecure });
        self
    }

    /// Set the list key or channel name events are shipped to.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    option_setter!(
        #[doc = "Select the logical database (default 0)."]
        with_database,
        database,
        u32
    );
    option_setter!(with_connect_timeout_ms, connect_timeout_ms, u64);
    option_setter!(with_io_timeout_ms, io_timeout_ms, u64);
    option_setter!(with_delivery_method, delivery_method, DeliveryMethod);
    option_setter!(
        #[doc = "Queue length that triggers a flush on the appending thread."]
        with_max_buffered_items,
        max_buffered_items,
        usize
    );
    option_setter!(
        #[doc = "Maximum time between flushes, in milliseconds."]
        with_flush_interval_ms,
        flush_interval_ms,
        u64
    );
    option_setter!(with_max_init_tries, max_init_tries, RetryLimit);
    option_setter!(with_retry_interval_ms, retry_interval_ms, u64);
    option_setter!(
        #[doc = "Bound the queue; events beyond it are dropped."]
        with_queue_capacity,
        queue_capacity,
        usize
    );
    option_setter!(with_warn_interval_ms, warn_interval_ms, u64);

    fn validate(&self) -> Result<(), BuildError> {
        self.validate_topology()?;
        self.validate_timeouts()?;
        self.assemble_writer_config().validate()
    }

    fn validate_topology(&self) -> Result<(), BuildError> {
        match &self.topology {
            TopologyConfig::Node { host, .. } if host.trim().is_empty() => Err(
                BuildError::InvalidConfig("redis host must not be empty".into()),
            ),
            TopologyConfig::Sentinel { master_name, .. } if master_name.trim().is_empty() => Err(
                BuildError::InvalidConfig("sentinel master name must not be empty".into()),
            ),
            TopologyConfig::Sentinel { sentinels, .. } => {
                let parsed = parse_sentinels(sentinels).map_err(BuildError::InvalidConfig)?;
                if parsed.is_empty() {
                    return Err(BuildError::InvalidConfig(
                        "sentinel list must not be empty".into(),
                    ));
                }
                Ok(())
            }
            TopologyConfig::Unix { .. } if self.tls.is_some() => Err(BuildError::InvalidConfig(
                "tls is only supported for tcp connections".into(),
            )),
            _ => Ok(()),
        }
    }

    fn validate_timeouts(&self) -> Result<(), BuildError> {
        if let Some(timeout) = self.connect_timeout_ms {
            ensure_positive!(timeout, "connect_timeout_ms")?;
        }
        if let Some(timeout) = self.io_timeout_ms {
            ensure_positive!(timeout, "io_timeout_ms")?;
        }
        Ok(())
    }

    /// Validate and produce the writer settings.
    pub fn writer_config(&self) -> Result<WriterConfig, BuildError> {
        self.validate()?;
        Ok(self.assemble_writer_config())
    }

    fn assemble_writer_config(&self) -> WriterConfig {
        let key = self.key.clone().unwrap_or_default();
        let mut config = WriterConfig::new(key);
        if let Some(method) = self.delivery_method {
            config.delivery_method = method;
        }
        if let Some(items) = self.max_buffered_items {
            config.max_buffered_items = items;
        }
        if let Some(interval) = self.flush_interval_ms {
            config.flush_interval = Duration::from_millis(interval);
        }
        if let Some(limit) = self.max_init_tries {
            config.max_init_tries = limit;
        }
        if let Some(interval) = self.retry_interval_ms {
            config.retry_interval = Duration::from_millis(interval);
        }
        if let Some(interval) = self.warn_interval_ms {
            config.warn_interval = Duration::from_millis(interval);
        }
        config.queue_capacity = self.queue_capacity;
        config
    }

    /// Validate and produce the connection settings.
    pub fn connection_config(&self) -> Result<RedisConnectionConfig, BuildError> {
        self.validate()?;
        let mut config = RedisConnectionConfig {
            scheme: self.build_scheme()?,
            password: self.password.clone().filter(|p| !p.is_empty()),
            database: self.database.unwrap_or(0),
            tls: self.build_tls_options(),
            ..RedisConnectionConfig::default()
        };
        if let Some(timeout) = self.connect_timeout_ms {
            config.connect_timeout = Duration::from_millis(timeout);
        }
        if let Some(timeout) = self.io_timeout_ms {
            config.io_timeout = Duration::from_millis(timeout);
        }
        Ok(config)
    }

    fn build_scheme(&self) -> Result<RedisScheme, BuildError> {
        match &self.topology {
            TopologyConfig::Node { host, port } => Ok(RedisScheme::Node {
                host: host.trim().to_owned(),
                port: *port,
            }),
            TopologyConfig::Sentinel {
                sentinels,
                master_name,
            } => Ok(RedisScheme::Sentinel {
                sentinels: parse_sentinels(sentinels).map_err(BuildError::InvalidConfig)?,
                master_name: master_name.trim().to_owned(),
            }),
            TopologyConfig::Unix { path } => Ok(RedisScheme::Unix { path: path.clone() }),
        }
    }

    fn build_tls_options(&self) -> Option<TlsOptions> {
        let fallback = match &self.topology {
            TopologyConfig::Node { host, .. } => host.trim().to_owned(),
            _ => String::new(),
        };
        self.tls.as_ref().map(|tls_cfg| TlsOptions {
            domain: tls_cfg
                .domain
                .clone()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or(fallback),
            insecure_skip_verify: tls_cfg.insecure,
        })
    }

    /// Build a writer connected through [`RedisConnectionProvider`].
    pub fn build<E: Send + 'static>(
        &self,
        encoder: Arc<dyn Encoder<E>>,
    ) -> Result<BufferedWriter<E>, BuildError> {
        let provider = Arc::new(RedisConnectionProvider::new(self.connection_config()?));
        self.build_with_provider(encoder, provider)
    }

    /// Build a writer for [`LogEvent`]s rendered by [`JsonEncoder`].
    pub fn build_json(&self) -> Result<BufferedWriter<LogEvent>, BuildError> {
        self.build::<LogEvent>(Arc::new(JsonEncoder))
    }

    /// Build a writer drawing connections from a caller supplied provider.
    /// Topology settings are ignored; everything else applies.
    pub fn build_with_provider<E: Send + 'static>(
        &self,
        encoder: Arc<dyn Encoder<E>>,
        provider: Arc<dyn ConnectionProvider>,
    ) -> Result<BufferedWriter<E>, BuildError> {
        BufferedWriter::new(self.writer_config()?, encoder, provider)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{
        connection::SentinelAddr,
        encoder::DisplayEncoder,
        test_utils::ScriptedProvider,
        writer::DEFAULT_MAX_BUFFERED_ITEMS,
    };

    fn keyed() -> WriterBuilder {
        WriterBuilder::new().with_key("logs")
    }

    fn invalid_message(builder: WriterBuilder) -> String {
        match builder.writer_config() {
            Err(BuildError::InvalidConfig(msg)) => msg,
            other => panic!("expected invalid config, got {other:?}"),
        }
    }

    #[rstest]
    fn builder_requires_key() {
        assert!(invalid_message(WriterBuilder::new()).contains("destination key"));
        assert!(invalid_message(WriterBuilder::new().with_key("  ")).contains("destination key"));
    }

    #[rstest]
    #[case(keyed().with_max_buffered_items(0), "max_buffered_items")]
    #[case(keyed().with_flush_interval_ms(0), "flush_interval")]
    #[case(keyed().with_queue_capacity(0), "queue_capacity")]
    #[case(keyed().with_max_init_tries(RetryLimit::Bounded(0)), "max_init_tries")]
    #[case(keyed().with_retry_interval_ms(0), "retry_interval")]
    #[case(keyed().with_connect_timeout_ms(0), "connect_timeout_ms")]
    #[case(keyed().with_io_timeout_ms(0), "io_timeout_ms")]
    fn builder_rejects_zero_values(#[case] builder: WriterBuilder, #[case] field: &str) {
        assert!(invalid_message(builder).contains(field));
    }

    #[rstest]
    #[case(keyed().with_node(" ", 6379), "host")]
    #[case(keyed().with_sentinels("s1:26379", ""), "master name")]
    #[case(keyed().with_sentinels(" , ", "mymaster"), "sentinel list")]
    #[case(keyed().with_sentinels("s1:port", "mymaster"), "s1:port")]
    #[case(keyed().with_unix_path("/tmp/redis.sock").with_tls(None, false), "tls")]
    fn builder_rejects_bad_topology(#[case] builder: WriterBuilder, #[case] needle: &str) {
        assert!(invalid_message(builder).contains(needle));
    }

    #[rstest]
    fn defaults_apply_when_unset() {
        let writer = keyed().writer_config().expect("valid config");
        assert_eq!(writer.destination_key, "logs");
        assert_eq!(writer.delivery_method, DeliveryMethod::ListAppend);
        assert_eq!(writer.max_buffered_items, DEFAULT_MAX_BUFFERED_ITEMS);
        assert_eq!(writer.max_init_tries, RetryLimit::Bounded(5));
        assert_eq!(writer.queue_capacity, None);

        let conn = keyed().connection_config().expect("valid config");
        assert_eq!(conn, RedisConnectionConfig::default());
    }

    #[rstest]
    fn sentinel_topology_is_parsed() {
        let conn = keyed()
            .with_sentinels("s1:26379, s2", "mymaster")
            .with_password("secret")
            .with_database(3)
            .connection_config()
            .expect("valid config");
        assert_eq!(
            conn.scheme,
            RedisScheme::Sentinel {
                sentinels: vec![
                    SentinelAddr {
                        host: "s1".into(),
                        port: 26379
                    },
                    SentinelAddr {
                        host: "s2".into(),
                        port: 26379
                    },
                ],
                master_name: "mymaster".into(),
            }
        );
        assert_eq!(conn.password.as_deref(), Some("secret"));
        assert_eq!(conn.database, 3);
    }

    #[rstest]
    fn tls_domain_defaults_to_host() {
        let conn = keyed()
            .with_node("redis.internal", 6380)
            .with_tls(None, true)
            .connection_config()
            .expect("valid config");
        assert_eq!(
            conn.tls,
            Some(TlsOptions {
                domain: "redis.internal".into(),
                insecure_skip_verify: true,
            })
        );
    }

    #[rstest]
    fn overrides_apply() {
        let writer = keyed()
            .with_delivery_method(DeliveryMethod::Publish)
            .with_max_buffered_items(10)
            .with_flush_interval_ms(250)
            .with_max_init_tries(RetryLimit::Unbounded)
            .with_retry_interval_ms(50)
            .with_queue_capacity(100)
            .writer_config()
            .expect("valid config");
        assert_eq!(writer.delivery_method, DeliveryMethod::Publish);
        assert_eq!(writer.max_buffered_items, 10);
        assert_eq!(writer.flush_interval, Duration::from_millis(250));
        assert_eq!(writer.max_init_tries, RetryLimit::Unbounded);
        assert_eq!(writer.retry_interval, Duration::from_millis(50));
        assert_eq!(writer.queue_capacity, Some(100));
    }

    #[rstest]
    fn build_with_provider_starts_writer() {
        let provider = ScriptedProvider::new();
        let writer = keyed()
            .with_max_buffered_items(1)
            .build_with_provider::<String>(
                Arc::new(DisplayEncoder::<String>::new()),
                Arc::new(provider.clone()),
            )
            .expect("build writer");
        writer.append("hello".to_owned());
        assert_eq!(provider.script().delivered_values(), vec!["hello".to_owned()]);
    }
}

//! INI configuration files.
//!
//! A configuration file has a `[redis]` section describing how to reach the
//! backend and a `[writer]` section describing batching and delivery:
//!
//! ```ini
//! [redis]
//! scheme = sentinel
//! sentinels = s1:26379, s2:26379
//! master_name = mymaster
//! database = 2
//!
//! [writer]
//! key = logs
//! method = rpush
//! max_buffered_items = 500
//! flush_interval_secs = 2
//! max_init_tries = unbounded
//! ```
//!
//! Parsing uses `rust-ini`; files are decoded with `encoding_rs` so non UTF-8
//! files can be loaded by naming their encoding.

use std::{fs, io::ErrorKind, path::Path, str::FromStr};

use encoding_rs::Encoding;
use ini::{Ini, Properties};

use crate::{
    builder::{BuildError, WriterBuilder},
    connection::{DEFAULT_HOST, DEFAULT_PORT, RetryLimit},
    writer::DeliveryMethod,
};

const REDIS_SECTION: &str = "redis";
const WRITER_SECTION: &str = "writer";

/// Load `path`, decoding it as `encoding` (UTF-8 when `None`).
///
/// # Errors
///
/// Returns [`BuildError::Io`] when the file cannot be read and
/// [`BuildError::InvalidConfig`] when it cannot be decoded or parsed, or
/// holds unknown keys or invalid values.
pub fn builder_from_ini_file(
    path: impl AsRef<Path>,
    encoding: Option<&str>,
) -> Result<WriterBuilder, BuildError> {
    let path = path.as_ref();
    let bytes = read_file_bytes(path)?;
    if bytes.is_empty() {
        return Err(BuildError::InvalidConfig(format!(
            "{} is an empty file",
            path.display()
        )));
    }
    let text = decode_with_encoding(&bytes, encoding.unwrap_or("utf-8"))?;
    builder_from_ini_str(&text)
}

/// Parse configuration from an in-memory INI document.
pub fn builder_from_ini_str(text: &str) -> Result<WriterBuilder, BuildError> {
    let ini = Ini::load_from_str(text)
        .map_err(|err| BuildError::InvalidConfig(format!("configuration is invalid: {err}")))?;
    let mut builder = WriterBuilder::new();
    if let Some(props) = ini.section(Some(REDIS_SECTION)) {
        builder = apply_redis_section(builder, props)?;
    }
    match ini.section(Some(WRITER_SECTION)) {
        Some(props) => apply_writer_section(builder, props),
        None => Err(BuildError::InvalidConfig(format!(
            "configuration requires a [{WRITER_SECTION}] section"
        ))),
    }
}

fn read_file_bytes(path: &Path) -> Result<Vec<u8>, BuildError> {
    fs::read(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => BuildError::Io(std::io::Error::new(
            ErrorKind::NotFound,
            format!("{} doesn't exist", path.display()),
        )),
        _ => BuildError::Io(err),
    })
}

fn decode_with_encoding(bytes: &[u8], label: &str) -> Result<String, BuildError> {
    let normalized_label = label.trim().to_ascii_lowercase();
    let encoding = Encoding::for_label(normalized_label.as_bytes())
        .ok_or_else(|| BuildError::InvalidConfig(format!("unknown encoding {label}")))?;
    let (decoded, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(BuildError::InvalidConfig(format!(
            "configuration is not valid {}",
            encoding.name()
        )));
    }
    Ok(decoded.into_owned())
}

fn parse_value<T: FromStr>(section: &str, key: &str, value: &str) -> Result<T, BuildError> {
    value.trim().parse().map_err(|_| {
        BuildError::InvalidConfig(format!("[{section}] {key} has invalid value '{value}'"))
    })
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, BuildError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BuildError::InvalidConfig(format!(
            "[{section}] {key} must be a boolean, got '{value}'"
        ))),
    }
}

fn secs_to_ms(section: &str, key: &str, value: &str) -> Result<u64, BuildError> {
    let secs: u64 = parse_value(section, key, value)?;
    secs.checked_mul(1000).ok_or_else(|| {
        BuildError::InvalidConfig(format!("[{section}] {key} is too large"))
    })
}

fn unknown_key(section: &str, key: &str) -> BuildError {
    BuildError::InvalidConfig(format!("unknown key '{key}' in [{section}]"))
}

fn apply_redis_section(
    mut builder: WriterBuilder,
    props: &Properties,
) -> Result<WriterBuilder, BuildError> {
    let s = REDIS_SECTION;
    let get = |key: &str| props.get(key).map(str::trim);
    for (key, _) in props.iter() {
        if !matches!(
            key,
            "scheme"
                | "host"
                | "port"
                | "sentinels"
                | "master_name"
                | "path"
                | "password"
                | "database"
                | "tls"
                | "tls_domain"
                | "tls_insecure"
                | "connect_timeout_ms"
                | "io_timeout_ms"
        ) {
            return Err(unknown_key(s, key));
        }
    }

    let scheme = match get("scheme") {
        Some(scheme) => scheme.to_ascii_lowercase(),
        None if get("sentinels").is_some() => "sentinel".to_owned(),
        None if get("path").is_some() => "unix".to_owned(),
        None => "node".to_owned(),
    };
    builder = match scheme.as_str() {
        "node" => {
            let host = get("host").unwrap_or(DEFAULT_HOST);
            let port = match get("port") {
                Some(port) => parse_value(s, "port", port)?,
                None => DEFAULT_PORT,
            };
            builder.with_node(host, port)
        }
        "sentinel" => builder.with_sentinels(
            get("sentinels").unwrap_or_default(),
            get("master_name").unwrap_or_default(),
        ),
        "unix" => match get("path") {
            Some(path) => builder.with_unix_path(path),
            None => {
                return Err(BuildError::InvalidConfig(format!(
                    "[{s}] scheme 'unix' requires a path"
                )));
            }
        },
        other => {
            return Err(BuildError::InvalidConfig(format!(
                "[{s}] unknown scheme '{other}'"
            )));
        }
    };

    if let Some(password) = get("password") {
        builder = builder.with_password(password);
    }
    if let Some(database) = get("database") {
        builder = builder.with_database(parse_value(s, "database", database)?);
    }
    let tls_requested = match get("tls") {
        Some(flag) => parse_bool(s, "tls", flag)?,
        None => false,
    };
    if tls_requested {
        let insecure = match get("tls_insecure") {
            Some(flag) => parse_bool(s, "tls_insecure", flag)?,
            None => false,
        };
        builder = builder.with_tls(get("tls_domain").map(str::to_owned), insecure);
    }
    if let Some(timeout) = get("connect_timeout_ms") {
        builder = builder.with_connect_timeout_ms(parse_value(s, "connect_timeout_ms", timeout)?);
    }
    if let Some(timeout) = get("io_timeout_ms") {
        builder = builder.with_io_timeout_ms(parse_value(s, "io_timeout_ms", timeout)?);
    }
    Ok(builder)
}

fn apply_writer_section(
    mut builder: WriterBuilder,
    props: &Properties,
) -> Result<WriterBuilder, BuildError> {
    let s = WRITER_SECTION;
    for (key, value) in props.iter() {
        builder = match key {
            "key" => builder.with_key(value.trim()),
            "method" => builder.with_delivery_method(
                value
                    .parse::<DeliveryMethod>()
                    .map_err(|err| BuildError::InvalidConfig(format!("[{s}] {err}")))?,
            ),
            "max_buffered_items" => builder.with_max_buffered_items(parse_value(s, key, value)?),
            "flush_interval_secs" => builder.with_flush_interval_ms(secs_to_ms(s, key, value)?),
            "max_init_tries" => builder.with_max_init_tries(parse_retry_limit(value)?),
            "retry_interval_secs" => builder.with_retry_interval_ms(secs_to_ms(s, key, value)?),
            "queue_capacity" => builder.with_queue_capacity(parse_value(s, key, value)?),
            "warn_interval_secs" => builder.with_warn_interval_ms(secs_to_ms(s, key, value)?),
            other => return Err(unknown_key(s, other)),
        };
    }
    Ok(builder)
}

fn parse_retry_limit(value: &str) -> Result<RetryLimit, BuildError> {
    if value.trim().eq_ignore_ascii_case("unbounded") {
        return Ok(RetryLimit::Unbounded);
    }
    parse_value(WRITER_SECTION, "max_init_tries", value).map(RetryLimit::Bounded)
}

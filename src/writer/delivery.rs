//! Wire operations used to ship a batch.

use std::{fmt, str::FromStr};

use crate::connection::{BackendConnection, ConnectionError};

/// How a drained batch reaches the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeliveryMethod {
    /// One `RPUSH` carrying the whole batch, in order.
    #[default]
    ListAppend,
    /// One `PUBLISH` per event.
    Publish,
}

impl DeliveryMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryMethod::ListAppend => "rpush",
            DeliveryMethod::Publish => "publish",
        }
    }

    /// Send `values` to `key` over `conn`.
    ///
    /// Publishing stops at the first failing item; the caller treats the
    /// whole batch as failed.
    pub fn send(
        self,
        conn: &mut dyn BackendConnection,
        key: &str,
        values: &[String],
    ) -> Result<(), ConnectionError> {
        match self {
            DeliveryMethod::ListAppend => conn.rpush(key, values),
            DeliveryMethod::Publish => values
                .iter()
                .try_for_each(|value| conn.publish(key, value)),
        }
    }
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rpush" | "list" => Ok(Self::ListAppend),
            "publish" | "pubsub" => Ok(Self::Publish),
            other => Err(format!("unknown delivery method '{other}'")),
        }
    }
}

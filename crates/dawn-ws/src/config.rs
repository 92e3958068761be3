//! Client configuration
//!
//! All settings are fixed once the client is built. Every field has a
//! default, so a JSON document only needs to name what it overrides:
//!
//! ```
//! use dawn_ws::config::{QueueCapacity, WebSocketConfig};
//! use std::time::Duration;
//!
//! let config = WebSocketConfig::from_json(
//!     r#"{"retry": {"retry_interval_ms": 250, "max_retries": 5}, "queue_capacity": {"bounded": 64}}"#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.retry.retry_interval, Duration::from_millis(250));
//! assert_eq!(config.queue_capacity, QueueCapacity::Bounded(64));
//! assert_eq!(config.connection.connect_timeout, Duration::from_secs(10));
//! ```

use crate::error::ConfigError;
use crate::reconnect::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts handed to the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Bound on the opening handshake
    #[serde(with = "duration_ms", rename = "connect_timeout_ms")]
    pub connect_timeout: Duration,
    /// Bound on waiting for the peer's close acknowledgement
    #[serde(with = "duration_ms", rename = "read_timeout_ms")]
    pub read_timeout: Duration,
    /// Bound on each outbound frame write
    #[serde(with = "duration_ms", rename = "write_timeout_ms")]
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(3),
        }
    }
}

impl ConnectionConfig {
    /// Create a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set write timeout
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Capacity of the outbound message queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueCapacity {
    /// No limit; `send` never waits
    #[default]
    Unbounded,
    /// At most this many pending messages; `send` waits for room
    Bounded(usize),
}

/// Complete client configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Transport timeouts
    pub connection: ConnectionConfig,
    /// Reconnection settings
    pub retry: ReconnectPolicy,
    /// Outbound queue bound
    pub queue_capacity: QueueCapacity,
}

impl WebSocketConfig {
    /// Create a config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set transport timeouts
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Set reconnection policy
    pub fn with_retry(mut self, retry: ReconnectPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Disable automatic reconnection
    pub fn without_reconnect(mut self) -> Self {
        self.retry = ReconnectPolicy::disabled();
        self
    }

    /// Set queue capacity
    pub fn with_queue_capacity(mut self, capacity: QueueCapacity) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Parse a JSON document and validate it
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every setting
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("connect_timeout", self.connection.connect_timeout),
            ("read_timeout", self.connection.read_timeout),
            ("write_timeout", self.connection.write_timeout),
        ];
        for (name, timeout) in timeouts {
            if timeout.is_zero() {
                return Err(ConfigError::ZeroTimeout { name });
            }
        }

        if self.retry.retry_interval.is_zero() {
            return Err(ConfigError::ZeroRetryInterval);
        }

        let multiplier = self.retry.backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::InvalidBackoffMultiplier { value: multiplier });
        }

        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::InvalidJitter {
                value: self.retry.jitter,
            });
        }

        if self.queue_capacity == QueueCapacity::Bounded(0) {
            return Err(ConfigError::ZeroQueueCapacity);
        }

        Ok(())
    }
}

/// Serialize a `Duration` as integer milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Same as [`duration_ms`] for optional values
pub(crate) mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

//! Server and client configuration.
//!
//! Both structs deserialize from JSON with every field optional; missing
//! fields take the defaults below.
//!
//! ```
//! use wirecall::config::{ClientConfig, ServerConfig};
//!
//! let server = ServerConfig::from_json_str(r#"{ "port": 7000, "pool_size": 2 }"#).unwrap();
//! assert_eq!(server.port, 7000);
//! assert_eq!(server.idle_timeout_secs, ServerConfig::DEFAULT_IDLE_TIMEOUT_SECS);
//!
//! let client = ClientConfig::default().host("10.0.0.5").port(7000);
//! assert!(client.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RpcError, Result};
use crate::writer::DEFAULT_CHANNEL_CAPACITY;

/// Configuration for [`RpcServer::start`](crate::RpcServer::start).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: String,
    /// Port to listen on (0 = ephemeral).
    pub port: u16,
    /// Number of I/O threads connections are spread over.
    pub pool_size: usize,
    /// Seconds a connection may stay silent before it is closed (0 = never).
    pub idle_timeout_secs: u64,
    /// Seconds between sweeps that drop closed connections.
    pub reap_interval_secs: u64,
    /// Outgoing frame queue capacity per connection.
    pub channel_capacity: usize,
}

impl ServerConfig {
    /// Default listening port.
    pub const DEFAULT_PORT: u16 = 9000;
    /// Default number of I/O threads.
    pub const DEFAULT_POOL_SIZE: usize = 4;
    /// Default idle timeout.
    pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 15;
    /// Default reaper interval.
    pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 10;

    /// Parse from JSON. Absent fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the bind interface.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the number of I/O threads.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the idle timeout in seconds (0 disables it).
    pub fn idle_timeout_secs(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = secs;
        self
    }

    /// Set the reaper interval in seconds.
    pub fn reap_interval_secs(mut self, secs: u64) -> Self {
        self.reap_interval_secs = secs;
        self
    }

    /// Set the per-connection queue capacity.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Idle timeout, `None` when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Reaper interval.
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    /// Check that the configuration can start a server.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(RpcError::InvalidConfig("pool_size must be at least 1".into()));
        }
        if self.reap_interval_secs == 0 {
            return Err(RpcError::InvalidConfig(
                "reap_interval_secs must be at least 1".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(RpcError::InvalidConfig(
                "channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: Self::DEFAULT_PORT,
            pool_size: Self::DEFAULT_POOL_SIZE,
            idle_timeout_secs: Self::DEFAULT_IDLE_TIMEOUT_SECS,
            reap_interval_secs: Self::DEFAULT_REAP_INTERVAL_SECS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Configuration for [`RpcClient::connect`](crate::RpcClient::connect).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ClientConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Deadline for a single connect attempt.
    pub connect_timeout_secs: u64,
    /// Total connect attempts (`None` = retry forever).
    pub reconnect_attempts: Option<u32>,
    /// Pause between failed connect attempts.
    pub retry_delay_ms: u64,
    /// How long a call waits for its reply (0 = forever).
    pub wait_timeout_secs: u64,
    /// Seconds between background heartbeats (0 = none).
    pub heartbeat_interval_secs: u64,
    /// Outgoing frame queue capacity.
    pub channel_capacity: usize,
}

impl ClientConfig {
    /// Default connect deadline.
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 2;
    /// Default reply wait.
    pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 2;
    /// Default pause between connect attempts.
    pub const DEFAULT_RETRY_DELAY_MS: u64 = 100;

    /// Parse from JSON. Absent fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the server host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the per-attempt connect deadline in seconds.
    pub fn connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Limit the number of connect attempts (`None` = unlimited).
    pub fn reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    /// Set the pause between connect attempts.
    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.retry_delay_ms = ms;
        self
    }

    /// Set the reply wait in seconds (0 = forever).
    pub fn wait_timeout_secs(mut self, secs: u64) -> Self {
        self.wait_timeout_secs = secs;
        self
    }

    /// Set the heartbeat interval in seconds (0 = none).
    pub fn heartbeat_interval_secs(mut self, secs: u64) -> Self {
        self.heartbeat_interval_secs = secs;
        self
    }

    /// Set the outgoing queue capacity.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// `host:port`, for logs and errors.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connect deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Pause between connect attempts.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Heartbeat interval, `None` when disabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }

    /// Check that the configuration can connect.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(RpcError::InvalidConfig("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(RpcError::InvalidConfig("port must not be 0".into()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(RpcError::InvalidConfig(
                "connect_timeout_secs must be at least 1".into(),
            ));
        }
        if self.reconnect_attempts == Some(0) {
            return Err(RpcError::InvalidConfig(
                "reconnect_attempts must be at least 1 when set".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(RpcError::InvalidConfig(
                "channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: ServerConfig::DEFAULT_PORT,
            connect_timeout_secs: Self::DEFAULT_CONNECT_TIMEOUT_SECS,
            reconnect_attempts: None,
            retry_delay_ms: Self::DEFAULT_RETRY_DELAY_MS,
            wait_timeout_secs: Self::DEFAULT_WAIT_TIMEOUT_SECS,
            heartbeat_interval_secs: 0,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

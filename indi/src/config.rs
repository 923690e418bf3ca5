//! Client configuration

use crate::protocol::{INDI_CONNECTION_TIMEOUT_MS, INDI_DEFAULT_PORT, INDI_PROTOCOL_VERSION};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings for one INDI server endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or address (default: localhost)
    pub host: String,
    /// Server port (default: 7624)
    pub port: u16,
    /// Timeout for the initial TCP connection (default: 2000 ms)
    pub connection_timeout_ms: u64,
    /// Version sent in the `getProperties` handshake (default: 1.7)
    pub protocol_version: String,
    /// Size of each socket read (default: 64 KiB)
    pub read_buffer_size: usize,
    /// Outbound commands queued before senders wait (default: 100)
    pub command_queue_depth: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: INDI_DEFAULT_PORT,
            connection_timeout_ms: INDI_CONNECTION_TIMEOUT_MS,
            protocol_version: INDI_PROTOCOL_VERSION.to_string(),
            read_buffer_size: 65536,
            command_queue_depth: 100,
        }
    }
}

impl ClientConfig {
    pub fn new(host: &str, port: Option<u16>) -> Self {
        Self {
            host: host.to_string(),
            port: port.unwrap_or(INDI_DEFAULT_PORT),
            ..Default::default()
        }
    }

    /// Get the connection timeout as a Duration
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// `host:port` for socket connect
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

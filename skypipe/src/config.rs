//! Server and client configuration
//!
//! Plain structs with defaults; the command line layer fills them in.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::envelope::PROTOCOL_TAG;
use crate::monitor::DEFAULT_MONITOR_CAPACITY;
use crate::wire::DEFAULT_MAX_MESSAGE_SIZE;

/// Default TCP port of the broker
pub const DEFAULT_PORT: u16 = 9000;

/// Default interval of the broker's registry summary log line
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to accept connections on
    pub bind: SocketAddr,
    /// Protocol tag expected on every request and put on every reply
    pub protocol_tag: String,
    /// Largest accepted message, all frames together
    pub max_message_size: usize,
    /// Capacity of the connection event channel
    pub monitor_capacity: usize,
    /// How often the broker logs registry stats
    pub stats_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            protocol_tag: PROTOCOL_TAG.to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            monitor_capacity: DEFAULT_MONITOR_CAPACITY,
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    #[must_use]
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    #[must_use]
    pub fn with_stats_interval(mut self, stats_interval: Duration) -> Self {
        self.stats_interval = stats_interval;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker address, `host:port`
    pub address: String,
    pub protocol_tag: String,
    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{DEFAULT_PORT}"),
            protocol_tag: PROTOCOL_TAG.to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl ClientConfig {
    /// Build a config for `address`
    ///
    /// A `tcp://` prefix, as used by satellite addresses, is stripped.
    #[must_use]
    pub fn with_address(mut self, address: &str) -> Self {
        self.address = address
            .strip_prefix("tcp://")
            .unwrap_or(address)
            .to_string();
        self
    }

    #[must_use]
    pub fn with_protocol_tag(mut self, protocol_tag: &str) -> Self {
        self.protocol_tag = protocol_tag.to_string();
        self
    }
}

//! Network Configuration
//!
//! Defaults suit a LAN game; every field can be overridden from the
//! environment with a `BOARDLINK_` variable.

use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::network::reliability::{RetryPolicy, DEFAULT_ACK_TIMEOUT, DEFAULT_MAX_RETRIES};
use crate::DEFAULT_PORT;

/// Transport and dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetConfig {
    /// Listen / dial port.
    pub port: u16,
    /// Interface the host binds.
    pub bind_addr: IpAddr,
    /// Room code peers must present; `None` admits legacy name-only handshakes.
    pub room_code: Option<String>,
    /// Wait for an ACK before resending.
    pub ack_timeout: Duration,
    /// Timeouts before a command is abandoned.
    pub max_retries: u32,
    /// Most simultaneous client sessions.
    pub max_peers: usize,
    /// Deadline for a new socket to send its CONNECT.
    pub handshake_timeout: Duration,
    /// Answer refused ack-required commands with NACK instead of dropping them.
    pub nack_unauthorized: bool,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            room_code: None,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            max_peers: 8,
            handshake_timeout: Duration::from_secs(10),
            nack_unauthorized: true,
        }
    }
}

impl NetConfig {
    /// Defaults overridden by `BOARDLINK_*` environment variables.
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            port: parsed(&get, "BOARDLINK_PORT").unwrap_or(defaults.port),
            bind_addr: parsed(&get, "BOARDLINK_BIND").unwrap_or(defaults.bind_addr),
            room_code: get("BOARDLINK_ROOM_CODE").filter(|c| !c.is_empty()),
            ack_timeout: parsed(&get, "BOARDLINK_ACK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.ack_timeout),
            max_retries: parsed(&get, "BOARDLINK_MAX_RETRIES").unwrap_or(defaults.max_retries),
            max_peers: parsed(&get, "BOARDLINK_MAX_PEERS").unwrap_or(defaults.max_peers),
            handshake_timeout: parsed(&get, "BOARDLINK_HANDSHAKE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.handshake_timeout),
            nack_unauthorized: get("BOARDLINK_NACK_UNAUTHORIZED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.nack_unauthorized),
        }
    }

    /// Retry policy for the reliability tracker.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.ack_timeout,
            max_retries: self.max_retries,
        }
    }
}

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|v| v.trim().parse().ok())
}

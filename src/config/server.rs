//! Host server configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::token::Protocol;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8080;

/// Host server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Interface to bind to.
    pub bind_host: String,
    /// Listening port.
    pub port: u16,
    /// Address advertised in connection tokens. Discovered when unset.
    pub advertise_address: Option<String>,
    /// Scheme advertised in connection tokens.
    ///
    /// The server itself speaks plain HTTP; `https` assumes a terminating
    /// proxy in front of it.
    pub protocol: Protocol,
    /// Time allowed for one connection, from accept to response.
    pub read_timeout_ms: u64,
    /// Upper bound on the size of one request body.
    pub max_request_bytes: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            advertise_address: None,
            protocol: Protocol::Http,
            read_timeout_ms: 10_000,
            max_request_bytes: 64 * 1024,
        }
    }
}

impl HostConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

//! Connection tokens.
//!
//! A token is the descriptor a joining device needs to reach a host: session
//! id, host address, port and scheme. Hosts serialize it to JSON for
//! out-of-band transfer (typically a scanned code); clients parse it back.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use chrono::Utc;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;

/// Characters escaped in a session id path segment.
///
/// Everything except `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
pub const SEGMENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Errors producing or parsing a token.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Malformed token: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Token field '{0}' is empty")]
    EmptyField(&'static str),

    #[error("Token port must be in 1-65535")]
    InvalidPort,

    #[error("Could not determine local address: {0}")]
    Discovery(#[from] std::io::Error),
}

/// URL scheme the host serves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable descriptor of a hosted session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionToken {
    pub session_id: String,
    #[serde(rename = "hostIp")]
    pub host_address: String,
    pub host_port: u16,
    pub protocol: Protocol,
}

impl ConnectionToken {
    /// Build and validate a token.
    pub fn new(
        session_id: impl Into<String>,
        host_address: impl Into<String>,
        host_port: u16,
        protocol: Protocol,
    ) -> Result<Self, TokenError> {
        let token = Self {
            session_id: session_id.into(),
            host_address: host_address.into(),
            host_port,
            protocol,
        };
        token.validate()?;
        Ok(token)
    }

    /// Parse a token from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, TokenError> {
        let token: Self = serde_json::from_str(json)?;
        token.validate()?;
        Ok(token)
    }

    /// Serialize to the JSON form carried by the scannable code.
    pub fn to_json(&self) -> Result<String, TokenError> {
        Ok(serde_json::to_string(self)?)
    }

    /// `{protocol}://{host}:{port}`, bracketing IPv6 literals.
    pub fn base_url(&self) -> String {
        let host = match self.host_address.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("[{v6}]"),
            _ => self.host_address.clone(),
        };
        format!("{}://{}:{}", self.protocol, host, self.host_port)
    }

    /// Full URL of the join endpoint for this token's session.
    pub fn join_url(&self) -> String {
        format!(
            "{}/api/session/{}/join",
            self.base_url(),
            utf8_percent_encode(&self.session_id, SEGMENT_ENCODE_SET)
        )
    }

    fn validate(&self) -> Result<(), TokenError> {
        if self.session_id.is_empty() {
            return Err(TokenError::EmptyField("sessionId"));
        }
        if self.host_address.is_empty() {
            return Err(TokenError::EmptyField("hostIp"));
        }
        if self.host_port == 0 {
            return Err(TokenError::InvalidPort);
        }
        Ok(())
    }
}

/// Generate a session id of the form `session-<unix-millis>`.
pub fn generate_session_id() -> String {
    format!("session-{}", Utc::now().timestamp_millis())
}

/// Best guess at this device's LAN address.
///
/// Connects an unbound UDP socket towards a public address and reads back
/// the local address the OS picked. No packet is sent.
pub async fn discover_local_ip() -> Result<IpAddr, TokenError> {
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
    socket
        .connect(SocketAddr::from((Ipv4Addr::new(192, 0, 2, 1), 9)))
        .await?;
    Ok(socket.local_addr()?.ip())
}

//! Tunnel connect/extend messages
//!
//! A connect request is written onto the tunnel built so far. Intermediate
//! requests ask the current last relay to extend the tunnel to the next relay
//! over tcp; the final request asks the last relay to reach the destination
//! with the caller's protocol. Every request carries a fresh hop token bound
//! to the relay that receives it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{HopToken, PublicKey};

/// Scheme used for the final, destination-bound remote address
pub const TARGET_SCHEME: &str = "target";

/// Tunnel protocol version spoken by this client
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion {
    major: 0,
    minor: 5,
    patch: 0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TunnelCommand {
    Connect,
}

/// Tunnel-extend / connect request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub command: TunnelCommand,
    pub protocol: String,
    pub remote: String,
    pub token: HopToken,
    pub version: ProtocolVersion,
}

impl ConnectRequest {
    /// Ask the current last relay to extend the tunnel to `relay_address`
    pub fn extend(relay_address: &str, token: HopToken) -> Self {
        Self {
            command: TunnelCommand::Connect,
            protocol: "tcp".to_string(),
            remote: relay_address.to_string(),
            token,
            version: PROTOCOL_VERSION,
        }
    }

    /// Ask the last relay to reach the caller's destination (`host:port`)
    pub fn target(protocol: &str, target: &str, token: HopToken) -> Self {
        Self {
            command: TunnelCommand::Connect,
            protocol: protocol.to_string(),
            remote: format!("{}://{}", TARGET_SCHEME, target),
            token,
            version: PROTOCOL_VERSION,
        }
    }

    /// Whether this request is addressed at the destination rather than a relay
    pub fn is_target(&self) -> bool {
        self.remote.starts_with(&format!("{}://", TARGET_SCHEME))
    }
}

/// Reply a relay writes after processing a connect request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub code: u16,
    #[serde(default)]
    pub desc: String,
    /// Public key of the relay that produced the failure, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl StatusReply {
    pub fn ok() -> Self {
        Self {
            code: 200,
            desc: "OK".to_string(),
            origin: None,
        }
    }

    pub fn error(code: u16, desc: impl Into<String>, origin: Option<PublicKey>) -> Self {
        Self {
            code,
            desc: desc.into(),
            origin: origin.map(|k| k.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Parsed origin, if present and well-formed
    pub fn origin_key(&self) -> Option<PublicKey> {
        self.origin.as_deref().and_then(|s| s.parse().ok())
    }

    /// Gateway-class codes mean the tunnel path itself failed
    pub fn is_circuit_error(&self) -> bool {
        matches!(self.code, 502 | 503 | 504)
    }
}

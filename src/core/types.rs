//! # Core Types
//!
//! Identity types shared by the resolver, the ring, the exporter pool and the
//! dispatcher.
//!
//! - [`Endpoint`] is an opaque backend address. Two endpoints are the same
//!   backend exactly when their strings are equal.
//! - [`RoutingKey`] is the fixed-width correlation key extracted from a
//!   telemetry item (a trace id, or a digest of some other identity).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Address of one backend instance telemetry can be sent to
///
/// Cloning is cheap: the address is stored behind an `Arc<str>` because the same
/// endpoint is referenced from the ring, the pool and every dispatch result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(Arc<str>);

impl Endpoint {
    /// Create an endpoint from any string-like address
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(Arc::from(address.as_ref()))
    }

    /// Get the address as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the address already carries an explicit port
    ///
    /// Handles bracketed IPv6 literals (`[::1]:4317`) and rejects bare IPv6
    /// addresses, whose colons are not port separators.
    pub fn has_port(&self) -> bool {
        let addr = self.as_str();
        if let Some(rest) = addr.strip_prefix('[') {
            return rest.contains("]:");
        }
        match addr.rsplit_once(':') {
            Some((host, port)) => !host.contains(':') && port.parse::<u16>().is_ok(),
            None => false,
        }
    }

    /// Return this endpoint with `default_port` appended when no port is present
    ///
    /// Resolvers may hand out bare hosts; exporter factories use this to target
    /// the default OTLP port.
    pub fn with_default_port(&self, default_port: u16) -> Endpoint {
        if self.has_port() {
            return self.clone();
        }
        let addr = self.as_str();
        if addr.contains(':') && !addr.starts_with('[') {
            Endpoint::new(format!("[{}]:{}", addr, default_port))
        } else {
            Endpoint::new(format!("{}:{}", addr, default_port))
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(value: &str) -> Self {
        Endpoint::new(value)
    }
}

impl From<String> for Endpoint {
    fn from(value: String) -> Self {
        Endpoint::new(value)
    }
}

impl AsRef<str> for Endpoint {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Sort and deduplicate an endpoint list
///
/// Every endpoint set that crosses a component boundary goes through this, so
/// two lists with the same members always compare equal.
pub fn normalize_endpoints<I>(endpoints: I) -> Vec<Endpoint>
where
    I: IntoIterator<Item = Endpoint>,
{
    let mut endpoints: Vec<Endpoint> = endpoints.into_iter().collect();
    endpoints.sort();
    endpoints.dedup();
    endpoints
}

/// Width of a routing key in bytes (the size of a trace id)
pub const ROUTING_KEY_LEN: usize = 16;

/// Correlation key used to pick a consistent destination endpoint
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct RoutingKey([u8; ROUTING_KEY_LEN]);

impl RoutingKey {
    /// The fallback key used for items without an extractable key
    pub const EMPTY: RoutingKey = RoutingKey([0u8; ROUTING_KEY_LEN]);

    pub const fn from_bytes(bytes: [u8; ROUTING_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive a key from an arbitrary identity (service name, resource identity, ...)
    ///
    /// Uses the first 16 bytes of the SHA-256 digest so keys of different
    /// origins share the fixed width of a trace id.
    pub fn digest(identity: impl AsRef<[u8]>) -> Self {
        let hash = Sha256::digest(identity.as_ref());
        let mut bytes = [0u8; ROUTING_KEY_LEN];
        bytes.copy_from_slice(&hash[..ROUTING_KEY_LEN]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ROUTING_KEY_LEN] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; ROUTING_KEY_LEN]
    }
}

impl fmt::Debug for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoutingKey({})", hex::encode(self.0))
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Telemetry signal handled by an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Traces,
    Logs,
    Metrics,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Traces => "traces",
            Self::Logs => "logs",
            Self::Metrics => "metrics",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

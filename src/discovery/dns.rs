//! DNS-based discovery
//!
//! Resolves a hostname (typically a headless service) to all of its A/AAAA
//! records. Each address becomes one endpoint: the bare IP, or `ip:port` when a
//! port is configured (`[ip]:port` for IPv6).

use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::core::error::{LbResult, LoadBalancerError};
use crate::core::types::Endpoint;
use crate::discovery::resolver::EndpointSource;

/// Hostname to IP address lookup
#[async_trait]
pub trait HostLookup: Send + Sync + 'static {
    async fn lookup_ip(&self, hostname: &str) -> LbResult<Vec<IpAddr>>;
}

/// Lookup through the system resolver via `tokio::net::lookup_host`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioHostLookup;

#[async_trait]
impl HostLookup for TokioHostLookup {
    async fn lookup_ip(&self, hostname: &str) -> LbResult<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((hostname, 0))
            .await
            .map_err(|e| LoadBalancerError::discovery("dns", format!("lookup of {} failed: {}", hostname, e)))?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// [`EndpointSource`] backed by a [`HostLookup`]
pub struct DnsSource {
    hostname: String,
    port: Option<u16>,
    lookup: Arc<dyn HostLookup>,
}

impl DnsSource {
    /// Fails with a configuration error when `hostname` is empty
    pub fn new(hostname: impl Into<String>, port: Option<u16>, lookup: Arc<dyn HostLookup>) -> LbResult<Self> {
        let hostname = hostname.into();
        if hostname.trim().is_empty() {
            return Err(LoadBalancerError::config("dns resolver requires a hostname"));
        }
        Ok(Self { hostname, port, lookup })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    fn endpoint_for(&self, ip: IpAddr) -> Endpoint {
        match self.port {
            Some(port) => Endpoint::new(SocketAddr::new(ip, port).to_string()),
            None => Endpoint::new(ip.to_string()),
        }
    }
}

#[async_trait]
impl EndpointSource for DnsSource {
    fn name(&self) -> &'static str {
        "dns"
    }

    async fn list(&self) -> LbResult<Vec<Endpoint>> {
        let ips = self.lookup.lookup_ip(&self.hostname).await?;
        Ok(ips.into_iter().map(|ip| self.endpoint_for(ip)).collect())
    }
}

//! Fixed endpoint list

use async_trait::async_trait;
use tracing::info;

use crate::core::error::{LbResult, LoadBalancerError};
use crate::core::types::{normalize_endpoints, Endpoint};
use crate::discovery::resolver::{EndpointUpdates, Resolver};
use crate::observability::metrics::LoadBalancerTelemetry;

/// Resolver over a list given at construction; it never changes
#[derive(Debug)]
pub struct StaticResolver {
    endpoints: Vec<Endpoint>,
    telemetry: LoadBalancerTelemetry,
}

impl StaticResolver {
    /// Fails with a configuration error when the list is empty
    pub fn new<I>(endpoints: I, telemetry: LoadBalancerTelemetry) -> LbResult<Self>
    where
        I: IntoIterator<Item = Endpoint>,
    {
        let endpoints = normalize_endpoints(endpoints);
        if endpoints.is_empty() {
            return Err(LoadBalancerError::config(
                "static resolver requires at least one endpoint",
            ));
        }
        Ok(Self {
            endpoints,
            telemetry: telemetry.for_resolver("static"),
        })
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn start(&self, _updates: EndpointUpdates) -> LbResult<()> {
        self.telemetry.record_resolution(true);
        info!(resolver = "static", endpoints = ?self.endpoints, "Resolver started");
        Ok(())
    }

    async fn resolve(&self) -> LbResult<Vec<Endpoint>> {
        self.telemetry.record_resolution(true);
        Ok(self.endpoints.clone())
    }

    async fn stop(&self) -> LbResult<()> {
        Ok(())
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.clone()
    }
}

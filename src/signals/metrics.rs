use crate::core::config::MetricRoutingKey;
use crate::core::types::{RoutingKey, SignalType};
use crate::pdata::{Metric, Resource};
use crate::signals::SignalAdapter;

/// Routes metrics by resource identity, service name or metric name
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricAdapter {
    key: MetricRoutingKey,
}

impl MetricAdapter {
    pub fn new(key: MetricRoutingKey) -> Self {
        Self { key }
    }
}

impl SignalAdapter for MetricAdapter {
    type Item = Metric;

    fn signal(&self) -> SignalType {
        SignalType::Metrics
    }

    fn routing_key(&self, resource: &Resource, metric: &Metric) -> Option<RoutingKey> {
        match self.key {
            MetricRoutingKey::Resource => {
                if resource.attributes.is_empty() {
                    None
                } else {
                    Some(RoutingKey::digest(resource.identity()))
                }
            }
            MetricRoutingKey::Service => resource.service_name().map(RoutingKey::digest),
            MetricRoutingKey::Metric => Some(RoutingKey::digest(&metric.name)),
        }
    }
}

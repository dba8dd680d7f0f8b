use crate::core::config::TraceRoutingKey;
use crate::core::types::{RoutingKey, SignalType};
use crate::pdata::{Resource, Span};
use crate::signals::SignalAdapter;

/// Routes spans by trace id, or by the resource's `service.name`
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceAdapter {
    key: TraceRoutingKey,
}

impl TraceAdapter {
    pub fn new(key: TraceRoutingKey) -> Self {
        Self { key }
    }
}

impl SignalAdapter for TraceAdapter {
    type Item = Span;

    fn signal(&self) -> SignalType {
        SignalType::Traces
    }

    fn routing_key(&self, resource: &Resource, span: &Span) -> Option<RoutingKey> {
        match self.key {
            TraceRoutingKey::TraceId => span.trace_id.routing_key(),
            TraceRoutingKey::Service => resource.service_name().map(RoutingKey::digest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdata::TraceId;

    #[test]
    fn test_trace_id_key() {
        let adapter = TraceAdapter::default();
        let id = TraceId::from_bytes([7; 16]);
        let span = Span::new(id, "GET /");

        assert_eq!(
            adapter.routing_key(&Resource::default(), &span),
            Some(RoutingKey::from_bytes([7; 16]))
        );
        assert_eq!(
            adapter.routing_key_or_empty(&Resource::default(), &Span::new(TraceId::EMPTY, "x")),
            RoutingKey::EMPTY
        );
    }

    #[test]
    fn test_service_key_ignores_trace_id() {
        let adapter = TraceAdapter::new(TraceRoutingKey::Service);
        let resource = Resource::for_service("checkout");

        let a = adapter.routing_key(&resource, &Span::new(TraceId::from_bytes([1; 16]), "a"));
        let b = adapter.routing_key(&resource, &Span::new(TraceId::from_bytes([2; 16]), "b"));

        assert_eq!(a, Some(RoutingKey::digest("checkout")));
        assert_eq!(a, b);
        assert_eq!(adapter.routing_key(&Resource::default(), &Span::new(TraceId::EMPTY, "c")), None);
    }
}

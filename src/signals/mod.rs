//! # Signal Adapters
//!
//! The dispatcher is generic over the kind of telemetry it splits. A
//! [`SignalAdapter`] supplies the two signal-specific pieces:
//!
//! 1. which [`RoutingKey`] an item carries (`None` routes with
//!    [`RoutingKey::EMPTY`], so keyless items still go to one fixed endpoint)
//! 2. how a batch is regrouped per endpoint. The default keeps resource and
//!    scope placement and the relative order of items.
//!
//! Adapters hold no per-batch state and can be swapped freely.

pub mod logs;
pub mod metrics;
pub mod traces;

pub use logs::LogAdapter;
pub use self::metrics::MetricAdapter;
pub use traces::TraceAdapter;

use crate::core::types::{Endpoint, RoutingKey, SignalType};
use crate::pdata::{Batch, InstrumentationScope, Resource};

/// Signal-specific routing behaviour
pub trait SignalAdapter: Send + Sync + 'static {
    /// Item type of the batches this adapter understands
    type Item: Send + Sync + 'static;

    fn signal(&self) -> SignalType;

    /// Routing key of one item, `None` when the item has none
    fn routing_key(&self, resource: &Resource, item: &Self::Item) -> Option<RoutingKey>;

    /// Routing key with the empty-key fallback applied
    fn routing_key_or_empty(&self, resource: &Resource, item: &Self::Item) -> RoutingKey {
        self.routing_key(resource, item).unwrap_or(RoutingKey::EMPTY)
    }

    /// Split `batch` into one batch per endpoint chosen by `route`
    fn regroup<F>(&self, batch: Batch<Self::Item>, route: F) -> Vec<(Endpoint, Batch<Self::Item>)>
    where
        F: FnMut(&Resource, &InstrumentationScope, &Self::Item) -> Endpoint,
    {
        batch.partition_by(route)
    }
}

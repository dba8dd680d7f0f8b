//! Consistent-hash routing, the exporter pool and the batch dispatcher

pub mod balancer;
pub mod dispatcher;
pub mod pool;
pub mod ring;

pub use balancer::{BalancerSettings, LoadBalancer};
pub use dispatcher::{Delivery, DispatchContext, DispatchError, DispatchReport, Dispatcher, FailedDelivery};
pub use pool::{ExporterLease, ExporterPool, ExporterState, ReconcileOutcome};
pub use ring::HashRing;

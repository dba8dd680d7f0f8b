//! # Load-Balancing Exporter - Core Library Crate
//!
//! Distributes a stream of telemetry batches (traces, logs, metrics) across a
//! changing fleet of backends. Items that share a routing key (usually a trace
//! id) keep going to the same backend, and a fleet change only moves the keys
//! it has to.
//!
//! ## How the pieces fit
//!
//! ```text
//!  Resolver (static | dns | k8s)
//!      │ endpoint list changes
//!      ▼
//!  LoadBalancer ── HashRing (immutable, swapped on change)
//!      │        └─ ExporterPool (one exporter per endpoint)
//!      ▼
//!  Dispatcher<SignalAdapter> ── dispatch(batch) ──> per-endpoint sub-batches
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use loadbalancing_exporter::{
//!     DispatchContext, Dispatcher, LoadBalancerConfig, LoadBalancerTelemetry, TraceAdapter,
//! };
//!
//! let config = LoadBalancerConfig::load_from_file("loadbalancer.yaml").await?;
//! let dispatcher = Dispatcher::from_config(
//!     &config,
//!     TraceAdapter::new(config.routing.traces),
//!     my_exporter_factory,
//!     LoadBalancerTelemetry::global(),
//! )
//! .await?;
//! dispatcher.start().await?;
//! dispatcher.dispatch(traces, &DispatchContext::new()).await?;
//! ```

// Core modules - order matters for readability, not for the compiler

/// Error types, configuration and identity types shared by every component
pub mod core;

/// Telemetry data model: resources, scopes and signal items
pub mod pdata;

/// The downstream exporter capability the pool manages
pub mod exporter;

/// Resolvers that discover backend endpoints
pub mod discovery;

/// Ring, exporter pool, load balancer and dispatcher
pub mod load_balancing;

/// Per-signal routing key extraction
pub mod signals;

/// Logging setup and metrics
pub mod observability;

// Re-export commonly used types for easier access
// Users can write `use loadbalancing_exporter::LoadBalancerError` instead of the full path

pub use crate::core::config::LoadBalancerConfig;
pub use crate::core::error::{LbResult, LoadBalancerError};
pub use crate::core::types::{Endpoint, RoutingKey, SignalType};

pub use discovery::{create_resolver, Resolver};
pub use exporter::{DefaultPortFactory, Exporter, ExporterFactory};
pub use load_balancing::{
    DispatchContext, DispatchError, DispatchReport, Dispatcher, HashRing, LoadBalancer,
};
pub use observability::LoadBalancerTelemetry;
pub use pdata::{Batch, Logs, Metrics, Traces};
pub use signals::{LogAdapter, MetricAdapter, SignalAdapter, TraceAdapter};

/// Dispatcher for span batches
pub type TracesDispatcher = Dispatcher<TraceAdapter>;

/// Dispatcher for log batches
pub type LogsDispatcher = Dispatcher<LogAdapter>;

/// Dispatcher for metric batches
pub type MetricsDispatcher = Dispatcher<MetricAdapter>;

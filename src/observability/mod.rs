//! Logging setup and the metrics handle shared by all components

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
pub use self::metrics::LoadBalancerTelemetry;

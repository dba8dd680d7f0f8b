//! # Load Balancer Metrics
//!
//! All metrics go through a [`LoadBalancerTelemetry`] handle that is passed to
//! the components at construction. The handle decides where the `metrics`
//! facade calls land:
//!
//! - [`LoadBalancerTelemetry::global`] uses whatever recorder the host
//!   installed with `metrics::set_global_recorder`.
//! - [`LoadBalancerTelemetry::with_recorder`] scopes every call to a given
//!   recorder with `metrics::with_local_recorder`, so several load balancers
//!   (or tests) in one process never share state.
//! - [`LoadBalancerTelemetry::noop`] discards everything.
//!
//! ## Metrics
//!
//! | name | kind | labels |
//! |------|------|--------|
//! | `loadbalancer_num_resolutions` | counter | `resolver`, `success` |
//! | `loadbalancer_num_backends` | gauge | `resolver` |
//! | `loadbalancer_num_backend_updates` | counter | `resolver` |
//! | `loadbalancer_backend_latency` | histogram (ms) | `endpoint` |
//! | `loadbalancer_backend_outcome` | counter | `endpoint`, `success` |

use metrics::Recorder;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const NUM_RESOLUTIONS: &str = "loadbalancer_num_resolutions";
pub const NUM_BACKENDS: &str = "loadbalancer_num_backends";
pub const NUM_BACKEND_UPDATES: &str = "loadbalancer_num_backend_updates";
pub const BACKEND_LATENCY: &str = "loadbalancer_backend_latency";
pub const BACKEND_OUTCOME: &str = "loadbalancer_backend_outcome";

#[derive(Clone)]
enum TelemetrySink {
    Global,
    Local(Arc<dyn Recorder + Send + Sync>),
    Noop,
}

/// Handle used by the resolver, pool and dispatcher to record metrics
#[derive(Clone)]
pub struct LoadBalancerTelemetry {
    sink: TelemetrySink,
    resolver: &'static str,
}

impl LoadBalancerTelemetry {
    /// Record through the globally installed recorder
    pub fn global() -> Self {
        Self {
            sink: TelemetrySink::Global,
            resolver: "unknown",
        }
    }

    /// Record into the given recorder only
    pub fn with_recorder(recorder: Arc<dyn Recorder + Send + Sync>) -> Self {
        Self {
            sink: TelemetrySink::Local(recorder),
            resolver: "unknown",
        }
    }

    /// Discard all metrics
    pub fn noop() -> Self {
        Self {
            sink: TelemetrySink::Noop,
            resolver: "unknown",
        }
    }

    /// Label used for the resolver-scoped metrics
    pub fn for_resolver(mut self, resolver: &'static str) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn resolver_label(&self) -> &'static str {
        self.resolver
    }

    fn emit<F: FnOnce()>(&self, f: F) {
        match &self.sink {
            TelemetrySink::Global => f(),
            TelemetrySink::Local(recorder) => metrics::with_local_recorder(recorder.as_ref(), f),
            TelemetrySink::Noop => {}
        }
    }

    /// One resolution attempt finished
    pub fn record_resolution(&self, success: bool) {
        let resolver = self.resolver;
        self.emit(|| {
            metrics::counter!(NUM_RESOLUTIONS, "resolver" => resolver, "success" => bool_label(success))
                .increment(1);
        });
    }

    /// The pool now holds `count` exporters
    pub fn record_backends(&self, count: usize) {
        let resolver = self.resolver;
        self.emit(|| {
            metrics::gauge!(NUM_BACKENDS, "resolver" => resolver).set(count as f64);
        });
    }

    /// The endpoint set changed
    pub fn record_backend_update(&self) {
        let resolver = self.resolver;
        self.emit(|| {
            metrics::counter!(NUM_BACKEND_UPDATES, "resolver" => resolver).increment(1);
        });
    }

    /// One export to `endpoint` finished after `latency`
    pub fn record_backend_export(&self, endpoint: &str, latency: Duration, success: bool) {
        let endpoint = endpoint.to_string();
        self.emit(|| {
            metrics::histogram!(BACKEND_LATENCY, "endpoint" => endpoint.clone())
                .record(latency.as_secs_f64() * 1000.0);
            metrics::counter!(BACKEND_OUTCOME, "endpoint" => endpoint, "success" => bool_label(success))
                .increment(1);
        });
    }
}

impl Default for LoadBalancerTelemetry {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Debug for LoadBalancerTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sink = match self.sink {
            TelemetrySink::Global => "global",
            TelemetrySink::Local(_) => "local",
            TelemetrySink::Noop => "noop",
        };
        f.debug_struct("LoadBalancerTelemetry")
            .field("sink", &sink)
            .field("resolver", &self.resolver)
            .finish()
    }
}

fn bool_label(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

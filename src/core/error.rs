//! # Error Handling Module
//!
//! Every fallible operation in the exporter returns [`LbResult`]. The variants of
//! [`LoadBalancerError`] follow the failure taxonomy of the subsystem:
//!
//! - **Discovery** errors are transient: the resolver logs them and keeps the
//!   last-known-good endpoint list.
//! - **EndpointStart** errors are transient: the endpoint stays out of the pool
//!   until a later reconciliation pass starts it.
//! - **NoEndpoints** is a routing error and is fatal to one dispatch call only.
//! - **EndpointNotReady**, **Export**, **Timeout** and **Cancelled** are delivery
//!   errors. They are reported per endpoint and never abort sibling deliveries.
//! - **Configuration** errors are fatal at construction or start.
//!
//! The `thiserror` crate derives `Display` and `std::error::Error` from the
//! `#[error("...")]` attributes.

use thiserror::Error;

use crate::core::types::Endpoint;

/// Result type used throughout the exporter
pub type LbResult<T> = Result<T, LoadBalancerError>;

/// Errors produced by the load-balancing exporter
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadBalancerError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A resolver poll failed; the previous endpoint list is retained
    #[error("Discovery error ({resolver}): {message}")]
    Discovery { resolver: String, message: String },

    /// An exporter for a newly discovered endpoint could not be created or started
    #[error("Failed to start exporter for endpoint {endpoint}: {message}")]
    EndpointStart { endpoint: Endpoint, message: String },

    /// The current endpoint set is empty, nothing can be routed
    #[error("No endpoints available for routing")]
    NoEndpoints,

    /// The endpoint has no running exporter (still starting, or being removed)
    #[error("Endpoint {endpoint} is not ready")]
    EndpointNotReady { endpoint: Endpoint },

    /// A downstream exporter rejected or failed to deliver a batch
    #[error("Export failed: {message}")]
    Export { message: String },

    /// A downstream export did not finish before the dispatch deadline
    #[error("Export timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The dispatch was cancelled by the caller
    #[error("Dispatch cancelled")]
    Cancelled,

    /// A lifecycle operation on an exporter failed (shutdown, drain)
    #[error("Exporter lifecycle error ({endpoint}): {message}")]
    Lifecycle { endpoint: Endpoint, message: String },

    /// I/O errors (configuration files, lookups)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl LoadBalancerError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a discovery error for the named resolver
    pub fn discovery<R: Into<String>, S: Into<String>>(resolver: R, message: S) -> Self {
        Self::Discovery {
            resolver: resolver.into(),
            message: message.into(),
        }
    }

    /// Create an endpoint start error
    pub fn endpoint_start<S: Into<String>>(endpoint: &Endpoint, message: S) -> Self {
        Self::EndpointStart {
            endpoint: endpoint.clone(),
            message: message.into(),
        }
    }

    /// Create an endpoint-not-ready error
    pub fn not_ready(endpoint: &Endpoint) -> Self {
        Self::EndpointNotReady {
            endpoint: endpoint.clone(),
        }
    }

    /// Create an export error with a custom message
    pub fn export<S: Into<String>>(message: S) -> Self {
        Self::Export {
            message: message.into(),
        }
    }

    /// Create a lifecycle error for an endpoint
    pub fn lifecycle<S: Into<String>>(endpoint: &Endpoint, message: S) -> Self {
        Self::Lifecycle {
            endpoint: endpoint.clone(),
            message: message.into(),
        }
    }

    /// Whether the host pipeline may retry the affected telemetry
    ///
    /// Delivery errors are retryable. Configuration and routing errors are not:
    /// retrying them without an external change gives the same result.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::EndpointNotReady { .. } => true,
            Self::Export { .. } => true,
            Self::Timeout { .. } => true,
            Self::Cancelled => true,
            Self::Io { .. } => true,
            _ => false,
        }
    }

    /// Get a string representation of the error type for logs and metrics
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Discovery { .. } => "discovery_error",
            Self::EndpointStart { .. } => "endpoint_start_error",
            Self::NoEndpoints => "no_endpoints",
            Self::EndpointNotReady { .. } => "endpoint_not_ready",
            Self::Export { .. } => "export_error",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Lifecycle { .. } => "lifecycle_error",
            Self::Io { .. } => "io_error",
            Self::Yaml { .. } => "yaml_error",
        }
    }
}

/// Implement conversion from std::io::Error
impl From<std::io::Error> for LoadBalancerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Implement conversion from serde_yaml::Error
impl From<serde_yaml::Error> for LoadBalancerError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

/// Convenience macro for creating configuration errors
///
/// Usage: `config_error!("Invalid port: {}", port)`
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::core::error::LoadBalancerError::config(format!($($arg)*))
    };
}

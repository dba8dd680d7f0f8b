//! # Configuration Module
//!
//! Configuration structures for the load-balancing exporter and the loading
//! path that turns a YAML file into a validated [`LoadBalancerConfig`].
//!
//! ## Key Features
//! - YAML parsing with serde; every section has defaults
//! - Human readable durations (`5s`, `1m30s`) through `humantime_serde`
//! - Environment variable overrides (`LOADBALANCER_<SECTION>_<FIELD>`)
//! - Validation that reports every problem at once
//!
//! ## Example
//!
//! ```yaml
//! resolver:
//!   dns:
//!     hostname: otelcol-headless.observability.svc.cluster.local
//!     port: 4317
//!     interval: 5s
//!     timeout: 1s
//! routing:
//!   traces: trace_id
//! pool:
//!   drain_timeout: 30s
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::error::{LbResult, LoadBalancerError};

/// Default OTLP/gRPC port used when an endpoint carries no port
pub const DEFAULT_OTLP_PORT: u16 = 4317;

/// Default number of ring positions per endpoint
pub const DEFAULT_VIRTUAL_NODES: usize = 150;

/// Complete load-balancing exporter configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    /// Backend discovery; exactly one resolver must be configured
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Which attribute of the telemetry decides the destination
    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub ring: RingConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    /// Settings handed to the downstream exporters
    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl LoadBalancerConfig {
    /// Load configuration from a YAML file, apply env overrides and validate
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> LbResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            LoadBalancerError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut config = Self::parse_yaml(&content)?;

        // Apply environment variable overrides
        config.apply_env_overrides()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string
    ///
    /// Environment overrides are not applied.
    pub fn from_yaml_str(content: &str) -> LbResult<Self> {
        let config = Self::parse_yaml(content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_yaml(content: &str) -> LbResult<Self> {
        // An empty document deserializes to `null`; treat it as all defaults
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Supported variables:
    /// - `LOADBALANCER_LOG_LEVEL`, `LOADBALANCER_LOG_FORMAT`
    /// - `LOADBALANCER_DNS_HOSTNAME` (creates a DNS resolver section if absent)
    /// - `LOADBALANCER_DNS_PORT`, `LOADBALANCER_DNS_INTERVAL`
    pub fn apply_env_overrides(&mut self) -> LbResult<()> {
        use std::env;

        if let Ok(level) = env::var("LOADBALANCER_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = env::var("LOADBALANCER_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(hostname) = env::var("LOADBALANCER_DNS_HOSTNAME") {
            self.resolver
                .dns
                .get_or_insert_with(DnsResolverConfig::default)
                .hostname = hostname;
        }

        if let Ok(port) = env::var("LOADBALANCER_DNS_PORT") {
            let port: u16 = port.parse().map_err(|e| {
                LoadBalancerError::config(format!("Invalid LOADBALANCER_DNS_PORT: {}", e))
            })?;
            self.resolver
                .dns
                .get_or_insert_with(DnsResolverConfig::default)
                .port = Some(port);
        }

        if let Ok(interval) = env::var("LOADBALANCER_DNS_INTERVAL") {
            let interval = humantime::parse_duration(&interval).map_err(|e| {
                LoadBalancerError::config(format!("Invalid LOADBALANCER_DNS_INTERVAL: {}", e))
            })?;
            self.resolver
                .dns
                .get_or_insert_with(DnsResolverConfig::default)
                .interval = interval;
        }

        Ok(())
    }

    /// Validate the configuration, collecting every error found
    pub fn validate(&self) -> LbResult<()> {
        let mut errors = Vec::new();

        match self.resolver.configured_count() {
            0 => errors.push("no resolver specified, configure one of: static, dns, k8s".to_string()),
            1 => {}
            _ => errors.push("multiple resolvers specified, configure only one of: static, dns, k8s".to_string()),
        }

        if let Some(ref static_list) = self.resolver.static_list {
            if static_list.hostnames.is_empty() {
                errors.push("static resolver requires at least one hostname".to_string());
            }
            for (index, hostname) in static_list.hostnames.iter().enumerate() {
                if hostname.trim().is_empty() {
                    errors.push(format!("static resolver hostname {} is empty", index));
                }
            }
        }

        if let Some(ref dns) = self.resolver.dns {
            if dns.hostname.trim().is_empty() {
                errors.push("dns resolver hostname cannot be empty".to_string());
            }
            if dns.interval.is_zero() {
                errors.push("dns resolver interval must be greater than 0".to_string());
            }
            if dns.timeout.is_zero() {
                errors.push("dns resolver timeout must be greater than 0".to_string());
            }
            if dns.port == Some(0) {
                errors.push("dns resolver port must be greater than 0".to_string());
            }
        }

        if let Some(ref k8s) = self.resolver.k8s {
            if k8s.service.trim().is_empty() {
                errors.push("k8s resolver service cannot be empty".to_string());
            }
            if k8s.ports.iter().any(|port| *port == 0) {
                errors.push("k8s resolver ports must be greater than 0".to_string());
            }
            if k8s.interval.is_zero() {
                errors.push("k8s resolver interval must be greater than 0".to_string());
            }
            if k8s.timeout.is_zero() {
                errors.push("k8s resolver timeout must be greater than 0".to_string());
            }
        }

        if self.ring.virtual_nodes == 0 {
            errors.push("ring virtual_nodes must be greater than 0".to_string());
        }

        if self.pool.reconcile_interval.is_zero() {
            errors.push("pool reconcile_interval must be greater than 0".to_string());
        }

        if self.protocol.default_port == 0 {
            errors.push("protocol default_port must be greater than 0".to_string());
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => errors.push(format!("Invalid log level: {}", self.logging.level)),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "text" => {}
            _ => errors.push(format!("Invalid log format: {}", self.logging.format)),
        }

        if !errors.is_empty() {
            return Err(LoadBalancerError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }
}

/// Resolver section; exactly one field must be set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(rename = "static", default, skip_serializing_if = "Option::is_none")]
    pub static_list: Option<StaticResolverConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<DnsResolverConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s: Option<K8sResolverConfig>,
}

impl ResolverConfig {
    pub fn configured_count(&self) -> usize {
        [
            self.static_list.is_some(),
            self.dns.is_some(),
            self.k8s.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

/// Fixed list of backends
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticResolverConfig {
    pub hostnames: Vec<String>,
}

/// Backends discovered by resolving a hostname to its A/AAAA records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsResolverConfig {
    pub hostname: String,

    /// Port appended to every resolved address; bare IPs when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Re-resolution interval
    #[serde(with = "humantime_serde", default = "default_dns_interval")]
    pub interval: Duration,

    /// Timeout of a single lookup
    #[serde(with = "humantime_serde", default = "default_dns_timeout")]
    pub timeout: Duration,
}

impl Default for DnsResolverConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            port: None,
            interval: default_dns_interval(),
            timeout: default_dns_timeout(),
        }
    }
}

/// Backends discovered from a Kubernetes service's `Endpoints` object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct K8sResolverConfig {
    /// Service name; `name.namespace` is accepted when `namespace` is unset
    pub service: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Ports combined with every ready address
    #[serde(default = "default_k8s_ports")]
    pub ports: Vec<u16>,

    #[serde(with = "humantime_serde", default = "default_k8s_interval")]
    pub interval: Duration,

    /// Timeout of a single API call
    #[serde(with = "humantime_serde", default = "default_k8s_timeout")]
    pub timeout: Duration,

    /// Kubeconfig file; in-cluster or `KUBECONFIG` configuration when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig_path: Option<String>,
}

impl K8sResolverConfig {
    /// Split the configured service into `(name, namespace)`
    ///
    /// An explicit `namespace` wins; otherwise `name.namespace` is split at the
    /// first dot, and a bare name lives in the `default` namespace.
    pub fn service_and_namespace(&self) -> (String, String) {
        if let Some(ref namespace) = self.namespace {
            return (self.service.clone(), namespace.clone());
        }
        match self.service.split_once('.') {
            Some((name, namespace)) if !namespace.is_empty() => {
                (name.to_string(), namespace.to_string())
            }
            _ => (self.service.clone(), "default".to_string()),
        }
    }
}

impl Default for K8sResolverConfig {
    fn default() -> Self {
        Self {
            service: String::new(),
            namespace: None,
            ports: default_k8s_ports(),
            interval: default_k8s_interval(),
            timeout: default_k8s_timeout(),
            kubeconfig_path: None,
        }
    }
}

/// Routing key selection per signal; logs always route by trace id
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub traces: TraceRoutingKey,

    #[serde(default)]
    pub metrics: MetricRoutingKey,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceRoutingKey {
    /// Spans of one trace go to the same backend
    #[default]
    #[serde(alias = "traceID")]
    TraceId,
    /// Spans of one service go to the same backend
    Service,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricRoutingKey {
    /// Digest of the full resource attribute set
    #[default]
    Resource,
    /// `service.name` resource attribute
    Service,
    /// Metric name
    Metric,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingConfig {
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            virtual_nodes: default_virtual_nodes(),
        }
    }
}

/// Exporter pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on waiting for in-flight exports before shutting down a removed exporter
    #[serde(with = "humantime_serde", default = "default_drain_timeout")]
    pub drain_timeout: Duration,

    /// Periodic reconciliation, retries endpoints whose exporter failed to start
    #[serde(with = "humantime_serde", default = "default_reconcile_interval")]
    pub reconcile_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            drain_timeout: default_drain_timeout(),
            reconcile_interval: default_reconcile_interval(),
        }
    }
}

/// Settings shared by every downstream exporter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_otlp_port")]
    pub default_port: u16,

    /// Per-export timeout, applied when the caller gives no deadline
    #[serde(
        with = "humantime_serde",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            default_port: default_otlp_port(),
            timeout: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, text)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_dns_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_dns_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_k8s_ports() -> Vec<u16> {
    vec![DEFAULT_OTLP_PORT]
}

fn default_k8s_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_k8s_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_virtual_nodes() -> usize {
    DEFAULT_VIRTUAL_NODES
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_otlp_port() -> u16 {
    DEFAULT_OTLP_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

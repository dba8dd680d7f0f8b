//! # Backend Discovery
//!
//! Resolvers produce the list of endpoints telemetry can be sent to:
//!
//! - [`StaticResolver`]: a fixed list
//! - DNS: [`PollingResolver`] over a [`DnsSource`]
//! - Kubernetes: [`PollingResolver`] over a [`KubernetesSource`]
//!
//! Use [`create_resolver`] to build the one selected by configuration.

pub mod dns;
pub mod kubernetes;
pub mod resolver;
pub mod static_resolver;

pub use dns::{DnsSource, HostLookup, TokioHostLookup};
pub use kubernetes::KubernetesSource;
pub use resolver::{
    create_resolver, EndpointSource, EndpointUpdates, PollingResolver, Resolver, UPDATE_CHANNEL_CAPACITY,
};
pub use static_resolver::StaticResolver;

//! Kubernetes service discovery
//!
//! Reads the `Endpoints` object of a service and produces one endpoint per
//! ready address and configured port. Addresses listed as not ready are
//! skipped. A missing `Endpoints` object yields an empty answer, which the
//! poll loop treats like any other transient failure.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Endpoints;
use kube::{Api, Client};

use crate::core::config::K8sResolverConfig;
use crate::core::error::{LbResult, LoadBalancerError};
use crate::core::types::Endpoint;
use crate::discovery::resolver::EndpointSource;

/// [`EndpointSource`] backed by the Kubernetes API
pub struct KubernetesSource {
    api: Api<Endpoints>,
    service: String,
    namespace: String,
    ports: Vec<u16>,
}

impl KubernetesSource {
    /// Connect using the configured kubeconfig, or the default client configuration
    pub async fn connect(config: &K8sResolverConfig) -> LbResult<Self> {
        if config.service.trim().is_empty() {
            return Err(LoadBalancerError::config("k8s resolver requires a service"));
        }

        let client = if let Some(kubeconfig_path) = &config.kubeconfig_path {
            let kubeconfig = kube::config::Kubeconfig::read_from(kubeconfig_path)
                .map_err(|e| LoadBalancerError::config(format!("Failed to read kubeconfig: {}", e)))?;
            let kube_config = kube::Config::from_custom_kubeconfig(kubeconfig, &Default::default())
                .await
                .map_err(|e| LoadBalancerError::config(format!("Failed to create kube config: {}", e)))?;
            Client::try_from(kube_config)
                .map_err(|e| LoadBalancerError::config(format!("Failed to create kube client: {}", e)))?
        } else {
            Client::try_default().await.map_err(|e| {
                LoadBalancerError::config(format!("Failed to create default kube client: {}", e))
            })?
        };

        let (service, namespace) = config.service_and_namespace();
        Ok(Self::with_client(client, service, namespace, config.ports.clone()))
    }

    pub fn with_client(client: Client, service: String, namespace: String, ports: Vec<u16>) -> Self {
        Self {
            api: Api::namespaced(client, &namespace),
            service,
            namespace,
            ports,
        }
    }
}

/// Flatten an `Endpoints` object into `address:port` endpoints
pub fn endpoints_from_object(object: &Endpoints, ports: &[u16]) -> Vec<Endpoint> {
    let mut endpoints = Vec::new();
    for subset in object.subsets.iter().flatten() {
        for address in subset.addresses.iter().flatten() {
            let host = Endpoint::new(&address.ip);
            for port in ports {
                endpoints.push(host.with_default_port(*port));
            }
        }
    }
    endpoints
}

#[async_trait]
impl EndpointSource for KubernetesSource {
    fn name(&self) -> &'static str {
        "k8s"
    }

    async fn list(&self) -> LbResult<Vec<Endpoint>> {
        let object = self.api.get_opt(&self.service).await.map_err(|e| {
            LoadBalancerError::discovery(
                "k8s",
                format!("failed to read endpoints {}/{}: {}", self.namespace, self.service, e),
            )
        })?;

        Ok(object
            .map(|object| endpoints_from_object(&object, &self.ports))
            .unwrap_or_default())
    }
}

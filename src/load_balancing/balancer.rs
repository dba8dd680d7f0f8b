//! # Load Balancer
//!
//! Ties a [`Resolver`] to the current [`HashRing`] and the [`ExporterPool`].
//!
//! ## Update flow
//!
//! ```text
//! resolver ──mpsc──> reconcile task ──> pool.add_missing
//!                         ▲                  │
//!       reconcile tick ───┘           publish new ring
//!                                            │
//!                                     pool.remove_extra (drain, shutdown)
//! ```
//!
//! A single background task consumes resolver updates, so reconciliations run
//! one after the other in detection order. Routing only reads the ring pointer
//! (`parking_lot::RwLock<Arc<HashRing>>`), which is swapped, never mutated.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::{LoadBalancerConfig, DEFAULT_VIRTUAL_NODES};
use crate::core::error::{LbResult, LoadBalancerError};
use crate::core::types::Endpoint;
use crate::discovery::{create_resolver, Resolver, UPDATE_CHANNEL_CAPACITY};
use crate::exporter::{DefaultPortFactory, ExporterFactory};
use crate::load_balancing::pool::{ExporterLease, ExporterPool, ReconcileOutcome};
use crate::load_balancing::ring::HashRing;
use crate::observability::metrics::LoadBalancerTelemetry;

/// Tuning knobs of the load balancer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalancerSettings {
    pub virtual_nodes: usize,
    pub drain_timeout: Duration,
    pub reconcile_interval: Duration,
}

impl Default for BalancerSettings {
    fn default() -> Self {
        Self {
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
            drain_timeout: Duration::from_secs(30),
            reconcile_interval: Duration::from_secs(30),
        }
    }
}

impl BalancerSettings {
    pub fn from_config(config: &LoadBalancerConfig) -> Self {
        Self {
            virtual_nodes: config.ring.virtual_nodes,
            drain_timeout: config.pool.drain_timeout,
            reconcile_interval: config.pool.reconcile_interval,
        }
    }
}

struct Shared<B: Send + Sync + 'static> {
    ring: RwLock<Arc<HashRing>>,
    pool: ExporterPool<B>,
    virtual_nodes: usize,
}

impl<B: Send + Sync + 'static> Shared<B> {
    /// Start new exporters, publish the ring for `endpoints`, then retire old exporters
    async fn apply(&self, endpoints: Vec<Endpoint>) -> ReconcileOutcome {
        let ring = Arc::new(HashRing::build(endpoints, self.virtual_nodes));
        let members = ring.endpoints().to_vec();

        self.pool
            .reconcile_with(&members, || {
                *self.ring.write() = ring;
            })
            .await
    }

    /// Retry endpoints of the current ring that have no running exporter
    ///
    /// The ring is read under the pool's reconcile lock, after any concurrent
    /// `apply` has published.
    async fn reconcile_current(&self) -> ReconcileOutcome {
        self.pool
            .reconcile_to(|| self.ring.read().endpoints().to_vec())
            .await
    }
}

struct Background {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Keeps the ring and the exporter pool in line with a resolver
pub struct LoadBalancer<B: Send + Sync + 'static> {
    resolver: Arc<dyn Resolver>,
    shared: Arc<Shared<B>>,
    reconcile_interval: Duration,
    background: Mutex<Option<Background>>,
}

impl<B: Send + Sync + 'static> LoadBalancer<B> {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        factory: Arc<dyn ExporterFactory<B>>,
        settings: BalancerSettings,
        telemetry: LoadBalancerTelemetry,
    ) -> Self {
        let telemetry = telemetry.for_resolver(resolver.name());
        Self {
            resolver,
            shared: Arc::new(Shared {
                ring: RwLock::new(Arc::new(HashRing::build(Vec::new(), settings.virtual_nodes))),
                pool: ExporterPool::new(factory, settings.drain_timeout, telemetry),
                virtual_nodes: settings.virtual_nodes,
            }),
            reconcile_interval: settings.reconcile_interval,
            background: Mutex::new(None),
        }
    }

    /// Validate `config`, build its resolver and create the load balancer
    ///
    /// `factory` receives endpoints completed with `protocol.default_port`.
    pub async fn from_config(
        config: &LoadBalancerConfig,
        factory: Arc<dyn ExporterFactory<B>>,
        telemetry: LoadBalancerTelemetry,
    ) -> LbResult<Self> {
        config.validate()?;
        let resolver = create_resolver(&config.resolver, telemetry.clone()).await?;
        let factory = Arc::new(DefaultPortFactory::new(factory, config.protocol.default_port));
        Ok(Self::new(resolver, factory, BalancerSettings::from_config(config), telemetry))
    }

    /// Start the resolver, build the initial ring and begin consuming updates
    ///
    /// Resolver start errors are returned unchanged.
    pub async fn start(&self) -> LbResult<()> {
        if self.background.lock().is_some() {
            return Err(LoadBalancerError::config("load balancer already started"));
        }

        let (updates_tx, mut updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        self.resolver.start(updates_tx).await?;

        let baseline = self.resolver.endpoints();
        self.shared.apply(baseline).await;

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let shared = Arc::clone(&self.shared);
        let interval = self.reconcile_interval;
        let resolver = self.resolver.name();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            let mut updates_open = true;

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    update = updates_rx.recv(), if updates_open => match update {
                        Some(endpoints) => {
                            debug!(resolver, endpoints = ?endpoints, "Applying endpoint update");
                            shared.apply(endpoints).await;
                        }
                        None => {
                            debug!(resolver, "Resolver update channel closed");
                            updates_open = false;
                        }
                    },
                    _ = ticker.tick() => {
                        shared.reconcile_current().await;
                    }
                }
            }
        });

        *self.background.lock() = Some(Background { cancel, handle });

        info!(
            resolver = self.resolver.name(),
            endpoints = ?self.ring().endpoints(),
            "Load balancer started"
        );
        Ok(())
    }

    /// Stop discovery, drain and shut down every exporter
    ///
    /// Safe to call without a prior `start`.
    pub async fn shutdown(&self) -> LbResult<()> {
        if let Err(e) = self.resolver.stop().await {
            warn!(resolver = self.resolver.name(), error = %e, "Failed to stop resolver");
        }

        let background = self.background.lock().take();
        if let Some(background) = background {
            background.cancel.cancel();
            if let Err(e) = background.handle.await {
                warn!(error = %e, "Reconcile task ended abnormally");
            }
        }

        let empty = Arc::new(HashRing::build(Vec::new(), self.shared.virtual_nodes));
        self.shared
            .pool
            .reconcile_with(&[], || {
                *self.shared.ring.write() = empty;
            })
            .await;

        info!(resolver = self.resolver.name(), "Load balancer stopped");
        Ok(())
    }

    /// Apply an endpoint list immediately, as if the resolver had reported it
    pub async fn update_endpoints(&self, endpoints: Vec<Endpoint>) -> ReconcileOutcome {
        self.shared.apply(endpoints).await
    }

    /// Snapshot of the current ring
    pub fn ring(&self) -> Arc<HashRing> {
        self.shared.ring.read().clone()
    }

    pub fn lease(&self, endpoint: &Endpoint) -> LbResult<ExporterLease<B>> {
        self.shared.pool.get(endpoint)
    }

    pub fn pool(&self) -> &ExporterPool<B> {
        &self.shared.pool
    }

    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }
}

//! # Resolver Contract and the Poll/Diff Loop
//!
//! A [`Resolver`] owns the current list of backend endpoints and tells its
//! single subscriber when the list changes.
//!
//! ```text
//! start(tx) ──> initial resolution (baseline, not sent)
//!      │
//!      └──> background task: every `interval`
//!               list() ─ timeout ─> normalize ─> differs? ─> tx.send(new list)
//! ```
//!
//! Change detection always compares normalized (sorted, deduplicated) lists,
//! so a backend reordering its answer never causes a notification.
//!
//! A failed or empty poll keeps the last-known-good list; it is logged,
//! counted in `loadbalancer_num_resolutions{success="false"}` and retried on
//! the next tick.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::ResolverConfig;
use crate::core::error::{LbResult, LoadBalancerError};
use crate::core::types::{normalize_endpoints, Endpoint};
use crate::discovery::dns::{DnsSource, TokioHostLookup};
use crate::discovery::kubernetes::KubernetesSource;
use crate::discovery::static_resolver::StaticResolver;
use crate::observability::metrics::LoadBalancerTelemetry;

/// Receives every changed endpoint list, in detection order
pub type EndpointUpdates = mpsc::Sender<Vec<Endpoint>>;

/// Capacity of the update channel between a resolver and its subscriber
pub const UPDATE_CHANNEL_CAPACITY: usize = 16;

/// Produces and maintains the current list of backend endpoints
#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    /// Short name used in logs and metric labels (`static`, `dns`, `k8s`)
    fn name(&self) -> &'static str;

    /// Resolve once and begin background discovery
    ///
    /// The first resolution is the baseline and is available through
    /// [`Resolver::endpoints`] when this returns; only later changes are sent
    /// to `updates`. Fails only on invalid configuration.
    async fn start(&self, updates: EndpointUpdates) -> LbResult<()>;

    /// Resolve now and return the best-known list
    async fn resolve(&self) -> LbResult<Vec<Endpoint>>;

    /// Stop background discovery. Stopping a resolver that never started is a no-op.
    async fn stop(&self) -> LbResult<()>;

    /// Last-known-good list, without I/O
    fn endpoints(&self) -> Vec<Endpoint>;
}

/// One "list the current backends" call against a discovery backend
#[async_trait]
pub trait EndpointSource: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn list(&self) -> LbResult<Vec<Endpoint>>;
}

struct PollState<S> {
    source: S,
    interval: Duration,
    timeout: Duration,
    telemetry: LoadBalancerTelemetry,
    endpoints: RwLock<Vec<Endpoint>>,
    subscriber: Mutex<Option<EndpointUpdates>>,
    // Serializes resolutions so notifications leave in detection order
    resolve_lock: tokio::sync::Mutex<()>,
}

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodically polls an [`EndpointSource`] and notifies on change
pub struct PollingResolver<S: EndpointSource> {
    state: Arc<PollState<S>>,
    task: Mutex<Option<PollTask>>,
}

impl<S: EndpointSource> PollingResolver<S> {
    pub fn new(source: S, interval: Duration, timeout: Duration, telemetry: LoadBalancerTelemetry) -> Self {
        let name = source.name();
        Self {
            state: Arc::new(PollState {
                source,
                interval,
                timeout,
                telemetry: telemetry.for_resolver(name),
                endpoints: RwLock::new(Vec::new()),
                subscriber: Mutex::new(None),
                resolve_lock: tokio::sync::Mutex::new(()),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &S {
        &self.state.source
    }
}

impl<S: EndpointSource> PollState<S> {
    /// Poll the source once; returns the new list when it differs from the last one
    async fn refresh(&self) -> LbResult<Option<Vec<Endpoint>>> {
        let resolver = self.source.name();

        let listed = match tokio::time::timeout(self.timeout, self.source.list()).await {
            Ok(result) => result,
            Err(_) => Err(LoadBalancerError::discovery(
                resolver,
                format!("resolution timed out after {:?}", self.timeout),
            )),
        };

        let listed = match listed {
            Ok(listed) => listed,
            Err(e) => {
                self.telemetry.record_resolution(false);
                return Err(e);
            }
        };

        if listed.is_empty() {
            self.telemetry.record_resolution(false);
            return Err(LoadBalancerError::discovery(resolver, "resolution returned no endpoints"));
        }

        self.telemetry.record_resolution(true);

        let normalized = normalize_endpoints(listed);
        let mut current = self.endpoints.write();
        if *current == normalized {
            return Ok(None);
        }
        *current = normalized.clone();
        Ok(Some(normalized))
    }

    async fn resolve(&self) -> LbResult<Vec<Endpoint>> {
        let _guard = self.resolve_lock.lock().await;

        match self.refresh().await {
            Ok(Some(changed)) => {
                info!(
                    resolver = self.source.name(),
                    endpoints = ?changed,
                    "Endpoint list changed"
                );
                self.notify(changed).await;
            }
            Ok(None) => {
                debug!(resolver = self.source.name(), "Endpoint list unchanged");
            }
            Err(e) => {
                warn!(
                    resolver = self.source.name(),
                    error = %e,
                    "Resolution failed, keeping previous endpoints"
                );
            }
        }

        Ok(self.endpoints.read().clone())
    }

    async fn notify(&self, endpoints: Vec<Endpoint>) {
        let subscriber = self.subscriber.lock().clone();
        if let Some(subscriber) = subscriber {
            if subscriber.send(endpoints).await.is_err() {
                debug!(resolver = self.source.name(), "Subscriber dropped, discarding update");
            }
        }
    }
}

#[async_trait]
impl<S: EndpointSource> Resolver for PollingResolver<S> {
    fn name(&self) -> &'static str {
        self.state.source.name()
    }

    async fn start(&self, updates: EndpointUpdates) -> LbResult<()> {
        if self.task.lock().is_some() {
            return Err(LoadBalancerError::config(format!(
                "{} resolver already started",
                self.name()
            )));
        }

        // Baseline: resolved before the subscriber is registered
        self.state.resolve().await?;
        *self.state.subscriber.lock() = Some(updates);

        let cancel = CancellationToken::new();
        let state = Arc::clone(&self.state);
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(state.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the baseline already covered it
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // Errors are logged inside resolve and never stop the loop
                        let _ = state.resolve().await;
                    }
                }
            }
            debug!(resolver = state.source.name(), "Resolver poll loop stopped");
        });

        *self.task.lock() = Some(PollTask { cancel, handle });

        info!(
            resolver = self.name(),
            interval = ?self.state.interval,
            endpoints = self.state.endpoints.read().len(),
            "Resolver started"
        );
        Ok(())
    }

    async fn resolve(&self) -> LbResult<Vec<Endpoint>> {
        self.state.resolve().await
    }

    async fn stop(&self) -> LbResult<()> {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                warn!(resolver = self.name(), error = %e, "Resolver task ended abnormally");
            }
            info!(resolver = self.name(), "Resolver stopped");
        }
        self.state.subscriber.lock().take();
        Ok(())
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        self.state.endpoints.read().clone()
    }
}

/// Build the resolver selected by the configuration
///
/// Exactly one of `static`, `dns` and `k8s` must be set.
pub async fn create_resolver(
    config: &ResolverConfig,
    telemetry: LoadBalancerTelemetry,
) -> LbResult<Arc<dyn Resolver>> {
    match config.configured_count() {
        0 => return Err(LoadBalancerError::config("no resolver specified")),
        1 => {}
        _ => return Err(LoadBalancerError::config("multiple resolvers specified")),
    }

    if let Some(ref static_list) = config.static_list {
        let endpoints = static_list.hostnames.iter().map(Endpoint::new);
        return Ok(Arc::new(StaticResolver::new(endpoints, telemetry)?));
    }

    if let Some(ref dns) = config.dns {
        let source = DnsSource::new(&dns.hostname, dns.port, Arc::new(TokioHostLookup))?;
        return Ok(Arc::new(PollingResolver::new(
            source,
            dns.interval,
            dns.timeout,
            telemetry,
        )));
    }

    if let Some(ref k8s) = config.k8s {
        let source = KubernetesSource::connect(k8s).await?;
        return Ok(Arc::new(PollingResolver::new(
            source,
            k8s.interval,
            k8s.timeout,
            telemetry,
        )));
    }

    Err(LoadBalancerError::config("no resolver specified"))
}

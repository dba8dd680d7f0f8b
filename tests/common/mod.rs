//! Shared fixtures for the integration tests: recording exporters, a
//! scriptable resolver and small batch builders.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

use loadbalancing_exporter::discovery::{EndpointUpdates, StaticResolver};
use loadbalancing_exporter::load_balancing::BalancerSettings;
use loadbalancing_exporter::pdata::{InstrumentationScope, Resource, Span, TraceId};
use loadbalancing_exporter::{
    Endpoint, Exporter, ExporterFactory, LbResult, LoadBalancer, LoadBalancerError,
    LoadBalancerTelemetry, Resolver, Traces,
};

pub fn ep(address: &str) -> Endpoint {
    Endpoint::new(address)
}

pub fn eps(addresses: &[&str]) -> Vec<Endpoint> {
    addresses.iter().map(|address| Endpoint::new(*address)).collect()
}

/// A non-empty trace id derived from `n`
pub fn trace_id(n: u64) -> TraceId {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&n.to_be_bytes());
    bytes[15] = 1;
    TraceId::from_bytes(bytes)
}

/// One resource, one scope, one span per trace id
pub fn spans(ids: &[TraceId]) -> Traces {
    let items = ids
        .iter()
        .enumerate()
        .map(|(i, id)| Span::new(*id, format!("span-{}", i)))
        .collect();
    Traces::single(
        Resource::for_service("checkout"),
        InstrumentationScope::new("tests", "1.0"),
        items,
    )
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Lets a test hold exports open and observe when they begin
pub struct Gate {
    entered: Notify,
    release: Semaphore,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        })
    }

    /// Wait until some export is blocked on the gate
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self, exports: usize) {
        self.release.add_permits(exports);
    }

    async fn pass(&self) {
        self.entered.notify_one();
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
    }
}

/// Exporter that records every batch it receives
pub struct RecordingExporter<B> {
    pub endpoint: Endpoint,
    batches: Mutex<Vec<B>>,
    fail_start: bool,
    fail_export: bool,
    start_delay: Option<Duration>,
    gate: Option<Arc<Gate>>,
    started: AtomicBool,
    shut_down: AtomicBool,
    exports_in_progress: AtomicUsize,
    shut_down_during_export: AtomicBool,
}

impl<B: Clone + Send + Sync + 'static> RecordingExporter<B> {
    fn new(endpoint: Endpoint, fail_start: bool, fail_export: bool, gate: Option<Arc<Gate>>) -> Self {
        Self {
            endpoint,
            batches: Mutex::new(Vec::new()),
            fail_start,
            fail_export,
            start_delay: None,
            gate,
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            exports_in_progress: AtomicUsize::new(0),
            shut_down_during_export: AtomicBool::new(false),
        }
    }

    pub fn batches(&self) -> Vec<B> {
        self.batches.lock().clone()
    }

    pub fn export_count(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Whether `shutdown` ran while an export was still in progress
    pub fn was_shut_down_during_export(&self) -> bool {
        self.shut_down_during_export.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<B: Clone + Send + Sync + 'static> Exporter<B> for RecordingExporter<B> {
    async fn start(&self) -> LbResult<()> {
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_start {
            return Err(LoadBalancerError::export(format!("{} refused to start", self.endpoint)));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn export(&self, batch: &B) -> LbResult<()> {
        if self.is_shut_down() {
            return Err(LoadBalancerError::export("export after shutdown"));
        }
        self.exports_in_progress.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        self.exports_in_progress.fetch_sub(1, Ordering::SeqCst);

        if self.fail_export {
            return Err(LoadBalancerError::export(format!("{} rejected the batch", self.endpoint)));
        }
        self.batches.lock().push(batch.clone());
        Ok(())
    }

    async fn shutdown(&self) -> LbResult<()> {
        if self.exports_in_progress.load(Ordering::SeqCst) > 0 {
            self.shut_down_during_export.store(true, Ordering::SeqCst);
        }
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out [`RecordingExporter`]s and remembering them per endpoint
pub struct RecordingFactory<B> {
    exporters: Mutex<HashMap<Endpoint, Arc<RecordingExporter<B>>>>,
    failing_starts: Mutex<HashMap<Endpoint, usize>>,
    failing_exports: Mutex<HashSet<Endpoint>>,
    start_delays: Mutex<HashMap<Endpoint, Duration>>,
    gate: Mutex<Option<Arc<Gate>>>,
    created: AtomicUsize,
}

impl<B: Clone + Send + Sync + 'static> RecordingFactory<B> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            exporters: Mutex::new(HashMap::new()),
            failing_starts: Mutex::new(HashMap::new()),
            failing_exports: Mutex::new(HashSet::new()),
            start_delays: Mutex::new(HashMap::new()),
            gate: Mutex::new(None),
            created: AtomicUsize::new(0),
        })
    }

    /// The next `attempts` exporters created for `endpoint` fail to start
    pub fn fail_starts(&self, endpoint: &str, attempts: usize) {
        self.failing_starts.lock().insert(ep(endpoint), attempts);
    }

    /// Exporters created for `endpoint` reject every batch
    pub fn fail_exports(&self, endpoint: &str) {
        self.failing_exports.lock().insert(ep(endpoint));
    }

    /// Exporters created for `endpoint` take `delay` to start
    pub fn delay_starts(&self, endpoint: &str, delay: Duration) {
        self.start_delays.lock().insert(ep(endpoint), delay);
    }

    /// Exporters created from now on block every export on `gate`
    pub fn gate_exports(&self, gate: Arc<Gate>) {
        *self.gate.lock() = Some(gate);
    }

    pub fn exporter(&self, endpoint: &str) -> Option<Arc<RecordingExporter<B>>> {
        self.exporters.lock().get(&ep(endpoint)).cloned()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn as_factory(self: &Arc<Self>) -> Arc<dyn ExporterFactory<B>> {
        Arc::clone(self) as Arc<dyn ExporterFactory<B>>
    }
}

#[async_trait]
impl<B: Clone + Send + Sync + 'static> ExporterFactory<B> for RecordingFactory<B> {
    async fn create(&self, endpoint: &Endpoint) -> LbResult<Arc<dyn Exporter<B>>> {
        self.created.fetch_add(1, Ordering::SeqCst);

        let fail_start = {
            let mut failing = self.failing_starts.lock();
            match failing.get_mut(endpoint) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        let fail_export = self.failing_exports.lock().contains(endpoint);
        let gate = self.gate.lock().clone();

        let mut exporter = RecordingExporter::new(endpoint.clone(), fail_start, fail_export, gate);
        exporter.start_delay = self.start_delays.lock().get(endpoint).copied();
        let exporter = Arc::new(exporter);
        self.exporters.lock().insert(endpoint.clone(), Arc::clone(&exporter));
        Ok(exporter as Arc<dyn Exporter<B>>)
    }
}

/// Resolver driven by the test through [`MockResolver::push`]
pub struct MockResolver {
    endpoints: Mutex<Vec<Endpoint>>,
    subscriber: Mutex<Option<EndpointUpdates>>,
    start_error: Option<LoadBalancerError>,
    stopped: AtomicBool,
}

impl MockResolver {
    pub fn new(endpoints: Vec<Endpoint>) -> Arc<Self> {
        Arc::new(Self {
            endpoints: Mutex::new(endpoints),
            subscriber: Mutex::new(None),
            start_error: None,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn failing(error: LoadBalancerError) -> Arc<Self> {
        Arc::new(Self {
            endpoints: Mutex::new(Vec::new()),
            subscriber: Mutex::new(None),
            start_error: Some(error),
            stopped: AtomicBool::new(false),
        })
    }

    /// Report a new endpoint list to the subscriber
    pub async fn push(&self, endpoints: Vec<Endpoint>) {
        *self.endpoints.lock() = endpoints.clone();
        let subscriber = self.subscriber.lock().clone();
        if let Some(subscriber) = subscriber {
            subscriber.send(endpoints).await.expect("subscriber dropped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for MockResolver {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn start(&self, updates: EndpointUpdates) -> LbResult<()> {
        if let Some(error) = &self.start_error {
            return Err(error.clone());
        }
        *self.subscriber.lock() = Some(updates);
        Ok(())
    }

    async fn resolve(&self) -> LbResult<Vec<Endpoint>> {
        Ok(self.endpoints.lock().clone())
    }

    async fn stop(&self) -> LbResult<()> {
        self.stopped.store(true, Ordering::SeqCst);
        self.subscriber.lock().take();
        Ok(())
    }

    fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.lock().clone()
    }
}

pub fn settings() -> BalancerSettings {
    BalancerSettings {
        drain_timeout: Duration::from_secs(5),
        ..BalancerSettings::default()
    }
}

/// A started load balancer over a static endpoint list
pub async fn static_balancer<B: Clone + Send + Sync + 'static>(
    endpoints: &[&str],
    factory: &Arc<RecordingFactory<B>>,
) -> Arc<LoadBalancer<B>> {
    let resolver = StaticResolver::new(eps(endpoints), LoadBalancerTelemetry::noop()).unwrap();
    let balancer = LoadBalancer::new(
        Arc::new(resolver),
        factory.as_factory(),
        settings(),
        LoadBalancerTelemetry::noop(),
    );
    balancer.start().await.unwrap();
    Arc::new(balancer)
}

/// Run `future` with a two second timeout, failing the test when it expires
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("operation did not finish in time")
}

//! # Endpoint Exporter Pool
//!
//! Keeps exactly one live [`Exporter`] per endpoint and reconciles that set
//! against resolver updates while dispatches are running.
//!
//! ## Locking
//!
//! - `entries` (a `DashMap`) guards structure: which endpoints have an entry.
//! - Each entry's `state` mutex guards its lifecycle. [`ExporterPool::get`]
//!   checks `Running` and takes a lease under that lock, so once an entry is
//!   marked `Stopping` no new lease can appear.
//! - `reconcile_lock` serializes reconciliations. Lookups never touch it.
//!
//! Exporter `start`, `shutdown` and the drain wait run with no map or entry
//! lock held.
//!
//! ## Entry lifecycle
//!
//! ```text
//! Starting ──start ok──> Running ──removed──> Stopping ──drained──> Stopped
//!     └──start failed──> (dropped, retried on the next reconciliation)
//! ```

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::core::error::{LbResult, LoadBalancerError};
use crate::core::types::Endpoint;
use crate::exporter::{Exporter, ExporterFactory};
use crate::observability::metrics::LoadBalancerTelemetry;

/// Lifecycle state of a pooled exporter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// One endpoint's exporter and its lifecycle bookkeeping
pub struct ExporterEntry<B: Send + Sync + 'static> {
    endpoint: Endpoint,
    exporter: Arc<dyn Exporter<B>>,
    state: Mutex<ExporterState>,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl<B: Send + Sync + 'static> ExporterEntry<B> {
    fn new(endpoint: Endpoint, exporter: Arc<dyn Exporter<B>>) -> Self {
        Self {
            endpoint,
            exporter,
            state: Mutex::new(ExporterState::Starting),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ExporterState {
        *self.state.lock()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ExporterState) {
        *self.state.lock() = state;
    }

    /// Wait until no lease is outstanding; `false` when `timeout` expired first
    async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            while self.in_flight.load(Ordering::SeqCst) > 0 {
                self.idle.notified().await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

impl<B: Send + Sync + 'static> fmt::Debug for ExporterEntry<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExporterEntry")
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Permission to use a running exporter
///
/// While a lease is alive the pool will not shut the exporter down (up to the
/// drain timeout).
pub struct ExporterLease<B: Send + Sync + 'static> {
    entry: Arc<ExporterEntry<B>>,
}

impl<B: Send + Sync + 'static> ExporterLease<B> {
    pub fn endpoint(&self) -> &Endpoint {
        &self.entry.endpoint
    }

    pub async fn export(&self, batch: &B) -> LbResult<()> {
        self.entry.exporter.export(batch).await
    }
}

impl<B: Send + Sync + 'static> Drop for ExporterLease<B> {
    fn drop(&mut self) {
        if self.entry.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            // notify_one stores a permit, so a drainer that has not parked yet still wakes
            self.entry.idle.notify_one();
        }
    }
}

/// What one reconciliation pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub added: Vec<Endpoint>,
    pub removed: Vec<Endpoint>,
    /// Endpoints whose exporter could not be created or started
    pub failed: Vec<Endpoint>,
}

impl ReconcileOutcome {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.failed.is_empty()
    }
}

/// Pool of per-endpoint exporters
pub struct ExporterPool<B: Send + Sync + 'static> {
    factory: Arc<dyn ExporterFactory<B>>,
    entries: DashMap<Endpoint, Arc<ExporterEntry<B>>>,
    reconcile_lock: tokio::sync::Mutex<()>,
    drain_timeout: Duration,
    telemetry: LoadBalancerTelemetry,
}

impl<B: Send + Sync + 'static> ExporterPool<B> {
    pub fn new(
        factory: Arc<dyn ExporterFactory<B>>,
        drain_timeout: Duration,
        telemetry: LoadBalancerTelemetry,
    ) -> Self {
        Self {
            factory,
            entries: DashMap::new(),
            reconcile_lock: tokio::sync::Mutex::new(()),
            drain_timeout,
            telemetry,
        }
    }

    /// Lease the running exporter for `endpoint`
    ///
    /// Fails with `EndpointNotReady` when the endpoint has no entry or its
    /// exporter is not `Running`. Never blocks on I/O.
    pub fn get(&self, endpoint: &Endpoint) -> LbResult<ExporterLease<B>> {
        let entry = self
            .entries
            .get(endpoint)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| LoadBalancerError::not_ready(endpoint))?;

        {
            let state = entry.state.lock();
            if *state != ExporterState::Running {
                return Err(LoadBalancerError::not_ready(endpoint));
            }
            entry.in_flight.fetch_add(1, Ordering::SeqCst);
        }

        Ok(ExporterLease { entry })
    }

    /// Bring the pool in line with `endpoints`
    pub async fn reconcile(&self, endpoints: &[Endpoint]) -> ReconcileOutcome {
        self.reconcile_with(endpoints, || {}).await
    }

    /// Reconcile, running `publish` after new exporters started and before old ones drain
    ///
    /// The load balancer publishes its new ring from `publish`, so a key never
    /// routes to an endpoint whose exporter is not started yet, and an endpoint
    /// leaves the ring before its exporter is shut down.
    pub async fn reconcile_with<F>(&self, endpoints: &[Endpoint], publish: F) -> ReconcileOutcome
    where
        F: FnOnce(),
    {
        let _guard = self.reconcile_lock.lock().await;
        self.reconcile_locked(endpoints, publish).await
    }

    /// Reconcile against the endpoint set `desired` returns once the reconcile lock is held
    ///
    /// A reconciliation that finished while this one was waiting is already
    /// visible to `desired`, so a stale set is never applied over a newer one.
    pub async fn reconcile_to<D>(&self, desired: D) -> ReconcileOutcome
    where
        D: FnOnce() -> Vec<Endpoint>,
    {
        let _guard = self.reconcile_lock.lock().await;
        let endpoints = desired();
        self.reconcile_locked(&endpoints, || {}).await
    }

    async fn reconcile_locked<F>(&self, endpoints: &[Endpoint], publish: F) -> ReconcileOutcome
    where
        F: FnOnce(),
    {
        let (added, failed) = self.add_missing(endpoints).await;
        publish();
        let removed = self.remove_extra(endpoints).await;

        let outcome = ReconcileOutcome { added, removed, failed };
        if !outcome.added.is_empty() || !outcome.removed.is_empty() {
            self.telemetry.record_backend_update();
        }
        self.telemetry.record_backends(self.entries.len());

        if !outcome.is_noop() {
            info!(
                added = ?outcome.added,
                removed = ?outcome.removed,
                failed = ?outcome.failed,
                backends = self.entries.len(),
                "Exporter pool reconciled"
            );
        }
        outcome
    }

    async fn add_missing(&self, endpoints: &[Endpoint]) -> (Vec<Endpoint>, Vec<Endpoint>) {
        let missing: Vec<&Endpoint> = endpoints
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter(|endpoint| !self.entries.contains_key(*endpoint))
            .collect();

        let results = join_all(missing.into_iter().map(|endpoint| self.start_exporter(endpoint))).await;

        let mut added = Vec::new();
        let mut failed = Vec::new();
        for (endpoint, result) in results {
            match result {
                Ok(()) => added.push(endpoint),
                Err(e) => {
                    warn!(
                        endpoint = %endpoint,
                        error = %e,
                        "Failed to start exporter, endpoint will be retried on the next reconciliation"
                    );
                    failed.push(endpoint);
                }
            }
        }
        added.sort();
        failed.sort();
        (added, failed)
    }

    async fn start_exporter(&self, endpoint: &Endpoint) -> (Endpoint, LbResult<()>) {
        let exporter = match self.factory.create(endpoint).await {
            Ok(exporter) => exporter,
            Err(e) => {
                let message = e.to_string();
                return (endpoint.clone(), Err(LoadBalancerError::endpoint_start(endpoint, message)));
            }
        };

        let entry = Arc::new(ExporterEntry::new(endpoint.clone(), exporter));
        self.entries.insert(endpoint.clone(), Arc::clone(&entry));

        match entry.exporter.start().await {
            Ok(()) => {
                entry.set_state(ExporterState::Running);
                debug!(endpoint = %endpoint, "Exporter started");
                (endpoint.clone(), Ok(()))
            }
            Err(e) => {
                entry.set_state(ExporterState::Stopped);
                self.entries.remove(endpoint);
                let message = e.to_string();
                (endpoint.clone(), Err(LoadBalancerError::endpoint_start(endpoint, message)))
            }
        }
    }

    async fn remove_extra(&self, endpoints: &[Endpoint]) -> Vec<Endpoint> {
        let keep: HashSet<&Endpoint> = endpoints.iter().collect();
        let extra: Vec<Arc<ExporterEntry<B>>> = self
            .entries
            .iter()
            .filter(|entry| !keep.contains(entry.key()))
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let removed = join_all(extra.into_iter().map(|entry| self.stop_exporter(entry))).await;
        let mut removed: Vec<Endpoint> = removed.into_iter().collect();
        removed.sort();
        removed
    }

    async fn stop_exporter(&self, entry: Arc<ExporterEntry<B>>) -> Endpoint {
        entry.set_state(ExporterState::Stopping);

        if !entry.drain(self.drain_timeout).await {
            warn!(
                endpoint = %entry.endpoint,
                in_flight = entry.in_flight(),
                timeout = ?self.drain_timeout,
                "Drain timed out, shutting exporter down with exports in flight"
            );
        }

        if let Err(e) = entry.exporter.shutdown().await {
            let e = LoadBalancerError::lifecycle(&entry.endpoint, e.to_string());
            warn!(endpoint = %entry.endpoint, error = %e, "Exporter shutdown failed");
        }

        entry.set_state(ExporterState::Stopped);
        self.entries.remove(&entry.endpoint);
        debug!(endpoint = %entry.endpoint, "Exporter stopped");
        entry.endpoint.clone()
    }

    /// Drain and shut down every exporter
    pub async fn shutdown_all(&self) -> ReconcileOutcome {
        self.reconcile(&[]).await
    }

    /// Endpoints with a running exporter, sorted
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self
            .entries
            .iter()
            .filter(|entry| entry.value().state() == ExporterState::Running)
            .map(|entry| entry.key().clone())
            .collect();
        endpoints.sort();
        endpoints
    }

    pub fn state(&self, endpoint: &Endpoint) -> Option<ExporterState> {
        self.entries.get(endpoint).map(|entry| entry.value().state())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

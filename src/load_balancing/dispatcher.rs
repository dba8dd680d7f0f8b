//! # Batch Splitter / Dispatcher
//!
//! Entry point for telemetry. For each incoming batch:
//!
//! 1. take one snapshot of the ring
//! 2. let the [`SignalAdapter`] extract every item's routing key and regroup
//!    the batch per owning endpoint
//! 3. lease each endpoint's exporter and export all sub-batches concurrently
//! 4. wait for every sub-batch and aggregate the outcome
//!
//! Nothing is retried here. A failed sub-batch is handed back inside
//! [`DispatchError::Partial`] together with its endpoint and error, so the
//! host pipeline can retry exactly what was not delivered.

use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::config::LoadBalancerConfig;
use crate::core::error::{LbResult, LoadBalancerError};
use crate::core::types::{Endpoint, RoutingKey};
use crate::exporter::ExporterFactory;
use crate::load_balancing::balancer::LoadBalancer;
use crate::observability::metrics::LoadBalancerTelemetry;
use crate::pdata::Batch;
use crate::signals::SignalAdapter;

/// Cancellation and deadline for one dispatch call
#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl DispatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort sub-dispatches still running `timeout` from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Abort sub-dispatches still running when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// One sub-batch that reached its endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub endpoint: Endpoint,
    pub items: usize,
}

/// Successful outcome of a dispatch call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub deliveries: Vec<Delivery>,
}

impl DispatchReport {
    pub fn item_count(&self) -> usize {
        self.deliveries.iter().map(|delivery| delivery.items).sum()
    }

    pub fn endpoints(&self) -> Vec<&Endpoint> {
        self.deliveries.iter().map(|delivery| &delivery.endpoint).collect()
    }
}

/// One sub-batch that did not reach its endpoint
#[derive(Debug)]
pub struct FailedDelivery<B> {
    pub endpoint: Endpoint,
    pub error: LoadBalancerError,
    /// The undelivered sub-batch, for upstream retry
    pub batch: B,
}

/// Failure of a dispatch call
#[derive(Debug)]
pub enum DispatchError<B> {
    /// Nothing could be routed (no endpoints); nothing was sent
    Routing(LoadBalancerError),
    /// Some sub-batches failed; `delivered` were exported successfully
    Partial {
        delivered: Vec<Delivery>,
        failed: Vec<FailedDelivery<B>>,
    },
}

impl<B> DispatchError<B> {
    /// Endpoints whose sub-batch failed, in dispatch order
    pub fn failed_endpoints(&self) -> Vec<&Endpoint> {
        match self {
            Self::Routing(_) => Vec::new(),
            Self::Partial { failed, .. } => failed.iter().map(|failure| &failure.endpoint).collect(),
        }
    }

    pub fn delivered(&self) -> &[Delivery] {
        match self {
            Self::Routing(_) => &[],
            Self::Partial { delivered, .. } => delivered,
        }
    }

    /// Whether every failure is worth retrying upstream
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Routing(error) => error.is_retryable(),
            Self::Partial { failed, .. } => failed.iter().all(|failure| failure.error.is_retryable()),
        }
    }

    /// Consume the error, keeping only the undelivered sub-batches
    pub fn into_failed_batches(self) -> Vec<B> {
        match self {
            Self::Routing(_) => Vec::new(),
            Self::Partial { failed, .. } => failed.into_iter().map(|failure| failure.batch).collect(),
        }
    }
}

impl<B> fmt::Display for DispatchError<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Routing(error) => write!(f, "Dispatch rejected: {}", error),
            Self::Partial { delivered, failed } => {
                write!(
                    f,
                    "Dispatch partially failed: {} of {} sub-batches failed",
                    failed.len(),
                    failed.len() + delivered.len()
                )?;
                for failure in failed {
                    write!(f, "; {}: {}", failure.endpoint, failure.error)?;
                }
                Ok(())
            }
        }
    }
}

impl<B: fmt::Debug> std::error::Error for DispatchError<B> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Routing(error) => Some(error),
            Self::Partial { failed, .. } => failed
                .first()
                .map(|failure| &failure.error as &(dyn std::error::Error + 'static)),
        }
    }
}

/// Splits batches of one signal across the load balancer's endpoints
pub struct Dispatcher<A: SignalAdapter> {
    adapter: A,
    balancer: Arc<LoadBalancer<Batch<A::Item>>>,
    default_timeout: Option<Duration>,
    telemetry: LoadBalancerTelemetry,
}

impl<A: SignalAdapter> Dispatcher<A> {
    pub fn new(adapter: A, balancer: Arc<LoadBalancer<Batch<A::Item>>>, telemetry: LoadBalancerTelemetry) -> Self {
        Self {
            adapter,
            balancer,
            default_timeout: None,
            telemetry,
        }
    }

    /// Build the load balancer described by `config` and a dispatcher on top of it
    pub async fn from_config(
        config: &LoadBalancerConfig,
        adapter: A,
        factory: Arc<dyn ExporterFactory<Batch<A::Item>>>,
        telemetry: LoadBalancerTelemetry,
    ) -> LbResult<Self> {
        let balancer = LoadBalancer::from_config(config, factory, telemetry.clone()).await?;
        Ok(Self::new(adapter, Arc::new(balancer), telemetry).with_default_timeout(config.protocol.timeout))
    }

    /// Per-export timeout used when the context carries no deadline
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub async fn start(&self) -> LbResult<()> {
        self.balancer.start().await
    }

    pub async fn shutdown(&self) -> LbResult<()> {
        self.balancer.shutdown().await
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer<Batch<A::Item>>> {
        &self.balancer
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Route every item of `batch` and export the per-endpoint sub-batches
    ///
    /// Returns `Routing(NoEndpoints)` without side effects when the ring is
    /// empty. An empty batch succeeds without contacting any endpoint.
    pub async fn dispatch(
        &self,
        batch: Batch<A::Item>,
        ctx: &DispatchContext,
    ) -> Result<DispatchReport, DispatchError<Batch<A::Item>>> {
        if batch.is_empty() {
            return Ok(DispatchReport::default());
        }

        let ring = self.balancer.ring();
        let fallback = ring
            .locate(&RoutingKey::EMPTY)
            .map_err(DispatchError::Routing)?
            .clone();

        let adapter = &self.adapter;
        let groups = adapter.regroup(batch, |resource, _scope, item| {
            let key = adapter.routing_key_or_empty(resource, item);
            ring.owner(&key).cloned().unwrap_or_else(|| fallback.clone())
        });

        let started = Instant::now();
        let deadline = ctx
            .deadline()
            .or_else(|| self.default_timeout.map(|timeout| started + timeout));

        debug!(
            signal = self.adapter.signal().as_str(),
            sub_batches = groups.len(),
            "Dispatching batch"
        );

        let outcomes = join_all(
            groups
                .into_iter()
                .map(|(endpoint, sub_batch)| self.deliver(endpoint, sub_batch, ctx, started, deadline)),
        )
        .await;

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(delivery) => delivered.push(delivery),
                Err(failure) => failed.push(failure),
            }
        }

        if failed.is_empty() {
            Ok(DispatchReport { deliveries: delivered })
        } else {
            Err(DispatchError::Partial { delivered, failed })
        }
    }

    async fn deliver(
        &self,
        endpoint: Endpoint,
        batch: Batch<A::Item>,
        ctx: &DispatchContext,
        started: Instant,
        deadline: Option<Instant>,
    ) -> Result<Delivery, FailedDelivery<Batch<A::Item>>> {
        let items = batch.item_count();

        let lease = match self.balancer.lease(&endpoint) {
            Ok(lease) => lease,
            Err(error) => {
                warn!(endpoint = %endpoint, items, error = %error, "No exporter for endpoint");
                return Err(FailedDelivery { endpoint, error, batch });
            }
        };

        let export_started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = ctx.cancellation_token().cancelled() => Err(LoadBalancerError::Cancelled),
            _ = sleep_until(deadline) => Err(LoadBalancerError::Timeout {
                timeout_ms: deadline
                    .map(|deadline| deadline.saturating_duration_since(started).as_millis() as u64)
                    .unwrap_or_default(),
            }),
            result = lease.export(&batch) => result,
        };
        drop(lease);

        self.telemetry
            .record_backend_export(endpoint.as_str(), export_started.elapsed(), result.is_ok());

        match result {
            Ok(()) => {
                debug!(endpoint = %endpoint, items, "Sub-batch exported");
                Ok(Delivery { endpoint, items })
            }
            Err(error) => {
                warn!(endpoint = %endpoint, items, error = %error, "Sub-batch export failed");
                Err(FailedDelivery { endpoint, error, batch })
            }
        }
    }
}

/// Sleep until `deadline`, forever when there is none
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

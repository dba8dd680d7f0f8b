//! # Downstream Exporters
//!
//! The transport to a backend is not part of this crate. An [`Exporter`] is the
//! opaque "accept a batch and report the result" capability the pool keeps one
//! of per endpoint, and an [`ExporterFactory`] builds one for a newly
//! discovered endpoint.
//!
//! ## Lifecycle
//!
//! ```text
//! factory.create(endpoint) -> start() -> export()* -> shutdown()
//! ```
//!
//! The pool guarantees that `export` is never called before `start` returned
//! `Ok`, and that `shutdown` is only called once every in-flight `export` has
//! finished (or the drain timeout expired).

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

use crate::core::error::LbResult;
use crate::core::types::Endpoint;

/// A connection to one backend that accepts batches of type `B`
#[async_trait]
pub trait Exporter<B>: Send + Sync + 'static
where
    B: Send + Sync + 'static,
{
    /// Open connections or spawn background work
    async fn start(&self) -> LbResult<()> {
        Ok(())
    }

    /// Deliver one batch
    async fn export(&self, batch: &B) -> LbResult<()>;

    /// Flush and release resources
    async fn shutdown(&self) -> LbResult<()> {
        Ok(())
    }
}

/// Creates exporters for endpoints as they join the fleet
#[async_trait]
pub trait ExporterFactory<B>: Send + Sync + 'static
where
    B: Send + Sync + 'static,
{
    async fn create(&self, endpoint: &Endpoint) -> LbResult<Arc<dyn Exporter<B>>>;
}

/// Any `Fn(Endpoint) -> Future<Output = LbResult<Arc<dyn Exporter<B>>>>` is a factory
#[async_trait]
impl<B, F, Fut> ExporterFactory<B> for F
where
    B: Send + Sync + 'static,
    F: Fn(Endpoint) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = LbResult<Arc<dyn Exporter<B>>>> + Send + 'static,
{
    async fn create(&self, endpoint: &Endpoint) -> LbResult<Arc<dyn Exporter<B>>> {
        (self)(endpoint.clone()).await
    }
}

/// Factory adapter that hands the inner factory `host:default_port` for endpoints without a port
///
/// Pool and ring keep the endpoint as resolved; only the exporter sees the
/// completed address.
pub struct DefaultPortFactory<B: Send + Sync + 'static> {
    inner: Arc<dyn ExporterFactory<B>>,
    default_port: u16,
}

impl<B: Send + Sync + 'static> DefaultPortFactory<B> {
    pub fn new(inner: Arc<dyn ExporterFactory<B>>, default_port: u16) -> Self {
        Self { inner, default_port }
    }
}

#[async_trait]
impl<B: Send + Sync + 'static> ExporterFactory<B> for DefaultPortFactory<B> {
    async fn create(&self, endpoint: &Endpoint) -> LbResult<Arc<dyn Exporter<B>>> {
        self.inner.create(&endpoint.with_default_port(self.default_port)).await
    }
}

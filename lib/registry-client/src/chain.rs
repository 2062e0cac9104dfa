//! Stage chain for registry client calls
//!
//! A call traverses the stages in order. Each stage may rewrite the call
//! context or the request, fail the call, or hand it to the rest of the chain
//! through [`Next`] and observe the result on the way back.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use registry_api::{NetworkServiceEndpoint, NetworkServiceEndpointQuery};
use std::sync::Arc;
use tracing::trace;

use crate::{CallContext, Result};

/// Results of a find call
pub type EndpointStream = BoxStream<'static, Result<NetworkServiceEndpoint>>;

/// One stage of the registry client chain
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name (for logging)
    fn name(&self) -> &'static str {
        "UnnamedStage"
    }

    async fn register(
        &self,
        ctx: &mut CallContext,
        nse: NetworkServiceEndpoint,
        next: Next<'_>,
    ) -> Result<NetworkServiceEndpoint> {
        next.register(ctx, nse).await
    }

    async fn find(
        &self,
        ctx: &mut CallContext,
        query: NetworkServiceEndpointQuery,
        next: Next<'_>,
    ) -> Result<EndpointStream> {
        next.find(ctx, query).await
    }

    async fn unregister(
        &self,
        ctx: &mut CallContext,
        nse: NetworkServiceEndpoint,
        next: Next<'_>,
    ) -> Result<()> {
        next.unregister(ctx, nse).await
    }
}

/// The remaining stages of a chain.
///
/// `Next` is `Copy`, so a stage may traverse the rest of the chain more than
/// once.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
}

impl<'a> Next<'a> {
    pub fn new(stages: &'a [Arc<dyn Stage>]) -> Self {
        Self { stages }
    }

    pub async fn register(
        self,
        ctx: &mut CallContext,
        nse: NetworkServiceEndpoint,
    ) -> Result<NetworkServiceEndpoint> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                trace!("register -> {}", stage.name());
                stage.register(ctx, nse, Next::new(rest)).await
            }
            None => Ok(nse),
        }
    }

    pub async fn find(
        self,
        ctx: &mut CallContext,
        query: NetworkServiceEndpointQuery,
    ) -> Result<EndpointStream> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                trace!("find -> {}", stage.name());
                stage.find(ctx, query, Next::new(rest)).await
            }
            None => Ok(stream::empty().boxed()),
        }
    }

    pub async fn unregister(self, ctx: &mut CallContext, nse: NetworkServiceEndpoint) -> Result<()> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                trace!("unregister -> {}", stage.name());
                stage.unregister(ctx, nse, Next::new(rest)).await
            }
            None => Ok(()),
        }
    }
}

/// Ordered, immutable sequence of stages
#[derive(Clone, Default)]
pub struct Chain {
    stages: Vec<Arc<dyn Stage>>,
}

impl Chain {
    /// Create an empty chain
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a stage to the chain
    pub fn add<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Names of the stages, in traversal order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn head(&self) -> Next<'_> {
        Next::new(&self.stages)
    }
}

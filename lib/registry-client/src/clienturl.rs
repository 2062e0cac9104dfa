//! Address resolution stage

use async_trait::async_trait;
use registry_api::{NetworkServiceEndpoint, NetworkServiceEndpointQuery};

use crate::chain::{EndpointStream, Next, Stage};
use crate::{CallContext, Result, Target};

/// Sets the effective target of every call passing through
pub struct ClientUrlStage {
    target: Target,
}

impl ClientUrlStage {
    /// Send calls to a fixed target
    pub fn new(target: Target) -> Self {
        Self { target }
    }

    /// Send calls to this process's own listener bound on `listen_on`
    pub fn local(listen_on: &Target) -> Self {
        Self::new(listen_on.local())
    }

    pub fn target(&self) -> &Target {
        &self.target
    }
}

#[async_trait]
impl Stage for ClientUrlStage {
    fn name(&self) -> &'static str {
        "ClientUrlStage"
    }

    async fn register(
        &self,
        ctx: &mut CallContext,
        nse: NetworkServiceEndpoint,
        next: Next<'_>,
    ) -> Result<NetworkServiceEndpoint> {
        ctx.set_target(self.target.clone());
        next.register(ctx, nse).await
    }

    async fn find(
        &self,
        ctx: &mut CallContext,
        query: NetworkServiceEndpointQuery,
        next: Next<'_>,
    ) -> Result<EndpointStream> {
        ctx.set_target(self.target.clone());
        next.find(ctx, query).await
    }

    async fn unregister(
        &self,
        ctx: &mut CallContext,
        nse: NetworkServiceEndpoint,
        next: Next<'_>,
    ) -> Result<()> {
        ctx.set_target(self.target.clone());
        next.unregister(ctx, nse).await
    }
}

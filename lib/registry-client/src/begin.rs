//! Context-initialization stage

use async_trait::async_trait;
use registry_api::{NetworkServiceEndpoint, NetworkServiceEndpointQuery};
use std::time::Duration;
use tracing::{debug_span, Instrument, Span};
use uuid::Uuid;

use crate::chain::{EndpointStream, Next, Stage};
use crate::{CallContext, Result};

/// First stage of every call: assigns the call id, applies the default
/// deadline and opens the call's tracing span
pub struct BeginStage {
    call_timeout: Option<Duration>,
}

impl BeginStage {
    pub fn new(call_timeout: Option<Duration>) -> Self {
        Self { call_timeout }
    }

    fn begin(&self, ctx: &mut CallContext, operation: &'static str, name: &str) -> Span {
        let call_id = ctx.call_id().unwrap_or_else(Uuid::new_v4);
        ctx.set_call_id(call_id);
        ctx.set_attempt(0);
        if let Some(timeout) = self.call_timeout {
            ctx.limit_deadline(timeout);
        }
        debug_span!("registry_call", %call_id, operation, endpoint = name)
    }
}

impl Default for BeginStage {
    fn default() -> Self {
        Self::new(None)
    }
}

#[async_trait]
impl Stage for BeginStage {
    fn name(&self) -> &'static str {
        "BeginStage"
    }

    async fn register(
        &self,
        ctx: &mut CallContext,
        nse: NetworkServiceEndpoint,
        next: Next<'_>,
    ) -> Result<NetworkServiceEndpoint> {
        let span = self.begin(ctx, "register", &nse.name);
        next.register(ctx, nse).instrument(span).await
    }

    async fn find(
        &self,
        ctx: &mut CallContext,
        query: NetworkServiceEndpointQuery,
        next: Next<'_>,
    ) -> Result<EndpointStream> {
        let span = self.begin(ctx, "find", &query.network_service_endpoint.name);
        next.find(ctx, query).instrument(span).await
    }

    async fn unregister(
        &self,
        ctx: &mut CallContext,
        nse: NetworkServiceEndpoint,
        next: Next<'_>,
    ) -> Result<()> {
        let span = self.begin(ctx, "unregister", &nse.name);
        next.unregister(ctx, nse).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Chain;

    #[tokio::test(start_paused = true)]
    async fn test_begin_sets_call_state() {
        let chain = Chain::new().add(BeginStage::new(Some(Duration::from_secs(15))));
        let mut ctx = CallContext::background();

        chain
            .head()
            .register(&mut ctx, NetworkServiceEndpoint::new("nse-1", vec![]))
            .await
            .unwrap();

        assert!(ctx.call_id().is_some());
        assert!(ctx.deadline().is_some());
        assert_eq!(ctx.attempt(), 0);
    }

    #[tokio::test]
    async fn test_begin_keeps_caller_call_id() {
        let chain = Chain::new().add(BeginStage::default());
        let mut ctx = CallContext::background();
        let id = Uuid::new_v4();
        ctx.set_call_id(id);

        chain
            .head()
            .unregister(&mut ctx, NetworkServiceEndpoint::new("nse-1", vec![]))
            .await
            .unwrap();

        assert_eq!(ctx.call_id(), Some(id));
        assert!(ctx.deadline().is_none());
    }
}

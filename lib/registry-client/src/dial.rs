//! Dial stage

use async_trait::async_trait;
use registry_api::{NetworkServiceEndpoint, NetworkServiceEndpointQuery};
use std::sync::Arc;

use crate::chain::{EndpointStream, Next, Stage};
use crate::{CallContext, ClientError, ConnectionCache, Dialer, Result};

/// Obtains the connection for the call's target from the cache, dialing it
/// at most once per traversal. Dial failures are left to the retry stage.
pub struct DialStage {
    cache: Arc<ConnectionCache>,
    dialer: Arc<dyn Dialer>,
}

impl DialStage {
    pub fn new(cache: Arc<ConnectionCache>, dialer: Arc<dyn Dialer>) -> Self {
        Self { cache, dialer }
    }

    async fn dial(&self, ctx: &mut CallContext) -> Result<()> {
        if ctx.connection().is_some() {
            return Ok(());
        }

        let target = ctx.target().cloned().ok_or(ClientError::MissingTarget)?;
        let dialer = self.dialer.clone();
        let connection = ctx
            .run(self.cache.acquire(&target, move |target| async move {
                dialer.dial(&target).await
            }))
            .await?;

        ctx.set_connection(connection);
        Ok(())
    }
}

#[async_trait]
impl Stage for DialStage {
    fn name(&self) -> &'static str {
        "DialStage"
    }

    async fn register(
        &self,
        ctx: &mut CallContext,
        nse: NetworkServiceEndpoint,
        next: Next<'_>,
    ) -> Result<NetworkServiceEndpoint> {
        self.dial(ctx).await?;
        next.register(ctx, nse).await
    }

    async fn find(
        &self,
        ctx: &mut CallContext,
        query: NetworkServiceEndpointQuery,
        next: Next<'_>,
    ) -> Result<EndpointStream> {
        self.dial(ctx).await?;
        next.find(ctx, query).await
    }

    async fn unregister(
        &self,
        ctx: &mut CallContext,
        nse: NetworkServiceEndpoint,
        next: Next<'_>,
    ) -> Result<()> {
        self.dial(ctx).await?;
        next.unregister(ctx, nse).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Chain, Connection, Target};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Refusing {
        dials: AtomicU32,
    }

    #[async_trait]
    impl Dialer for Refusing {
        async fn dial(&self, target: &Target) -> Result<Connection> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::dial(target, "connection refused"))
        }
    }

    #[tokio::test]
    async fn test_single_dial_attempt_per_traversal() {
        let dialer = Arc::new(Refusing {
            dials: AtomicU32::new(0),
        });
        let cache = Arc::new(ConnectionCache::new());
        let chain = Chain::new().add(DialStage::new(cache.clone(), dialer.clone()));

        let mut ctx = CallContext::background();
        ctx.set_target("tcp://localhost:5002".parse().unwrap());
        let result = chain
            .head()
            .register(&mut ctx, NetworkServiceEndpoint::default())
            .await;

        assert!(matches!(result, Err(ClientError::Dial { .. })));
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(dialer.dials.load(Ordering::SeqCst), 1);
        assert!(ctx.connection().is_none());
    }

    #[tokio::test]
    async fn test_missing_target() {
        let chain = Chain::new().add(DialStage::new(
            Arc::new(ConnectionCache::new()),
            Arc::new(Refusing {
                dials: AtomicU32::new(0),
            }),
        ));
        let mut ctx = CallContext::background();
        let result = chain
            .head()
            .unregister(&mut ctx, NetworkServiceEndpoint::default())
            .await;
        assert_eq!(result, Err(ClientError::MissingTarget));
    }
}

//! Connection-lifecycle stage

use async_trait::async_trait;
use registry_api::{NetworkServiceEndpoint, NetworkServiceEndpointQuery};
use std::sync::Arc;
use tracing::warn;

use crate::chain::{EndpointStream, Next, Stage};
use crate::{CallContext, ClientError, ConnectionCache, Result};

/// Returns the connection borrowed by the rest of the chain to the cache,
/// evicting it when the call failed at the transport level
pub struct ClientConnStage {
    cache: Arc<ConnectionCache>,
}

impl ClientConnStage {
    pub fn new(cache: Arc<ConnectionCache>) -> Self {
        Self { cache }
    }

    fn finish(&self, ctx: &mut CallContext, error: Option<&ClientError>) {
        let Some(connection) = ctx.take_connection() else {
            return;
        };

        if let Some(error) = error.filter(|e| e.is_transport()) {
            warn!(
                "Dropping connection {} to {}: {}",
                connection.id(),
                connection.target(),
                error
            );
            self.cache.evict(connection.target(), connection.id());
        }
        self.cache.release(connection.target());
    }
}

#[async_trait]
impl Stage for ClientConnStage {
    fn name(&self) -> &'static str {
        "ClientConnStage"
    }

    async fn register(
        &self,
        ctx: &mut CallContext,
        nse: NetworkServiceEndpoint,
        next: Next<'_>,
    ) -> Result<NetworkServiceEndpoint> {
        ctx.target().ok_or(ClientError::MissingTarget)?;
        let result = next.register(ctx, nse).await;
        self.finish(ctx, result.as_ref().err());
        result
    }

    async fn find(
        &self,
        ctx: &mut CallContext,
        query: NetworkServiceEndpointQuery,
        next: Next<'_>,
    ) -> Result<EndpointStream> {
        ctx.target().ok_or(ClientError::MissingTarget)?;
        let result = next.find(ctx, query).await;
        self.finish(ctx, result.as_ref().err());
        result
    }

    async fn unregister(
        &self,
        ctx: &mut CallContext,
        nse: NetworkServiceEndpoint,
        next: Next<'_>,
    ) -> Result<()> {
        ctx.target().ok_or(ClientError::MissingTarget)?;
        let result = next.unregister(ctx, nse).await;
        self.finish(ctx, result.as_ref().err());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Chain, DialStage, H2Dialer, Target};
    use http_body_util::Full;
    use hyper::body::{Bytes, Incoming};
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::{TokioExecutor, TokioIo};
    use registry_api::wire::Code;
    use std::convert::Infallible;
    use std::time::Duration;

    /// Plaintext HTTP/2 server answering every request with an empty body
    async fn serve_h2() -> Target {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let service = service_fn(|_req: Request<Incoming>| async {
                        Ok::<_, Infallible>(Response::new(Full::new(Bytes::new())))
                    });
                    let _ = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
        Target::Tcp {
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    /// Terminal stage failing every register with a fixed error
    struct Failing(ClientError);

    #[async_trait]
    impl Stage for Failing {
        async fn register(
            &self,
            _ctx: &mut CallContext,
            _nse: NetworkServiceEndpoint,
            _next: Next<'_>,
        ) -> Result<NetworkServiceEndpoint> {
            Err(self.0.clone())
        }
    }

    fn chain(cache: &Arc<ConnectionCache>, error: ClientError) -> Chain {
        Chain::new()
            .add(ClientConnStage::new(cache.clone()))
            .add(DialStage::new(
                cache.clone(),
                Arc::new(H2Dialer::new(Duration::from_secs(1))),
            ))
            .add(Failing(error))
    }

    async fn register(chain: &Chain, target: &Target) -> Result<NetworkServiceEndpoint> {
        let mut ctx = CallContext::background();
        ctx.set_target(target.clone());
        let result = chain
            .head()
            .register(&mut ctx, NetworkServiceEndpoint::new("nse-1", vec![]))
            .await;
        assert!(ctx.connection().is_none());
        result
    }

    #[tokio::test]
    async fn test_transport_error_evicts_connection() {
        let target = serve_h2().await;
        let cache: Arc<ConnectionCache> = Arc::new(ConnectionCache::new());
        let chain = chain(&cache, ClientError::Transport("stream reset".to_string()));

        let result = register(&chain, &target).await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert!(!cache.contains(&target));
        assert_eq!(cache.leases(&target), 0);
        assert_eq!(cache.dial_count(), 1);

        register(&chain, &target).await.unwrap_err();
        assert_eq!(cache.dial_count(), 2);
    }

    #[tokio::test]
    async fn test_status_error_keeps_connection() {
        let target = serve_h2().await;
        let cache: Arc<ConnectionCache> = Arc::new(ConnectionCache::new());
        let chain = chain(
            &cache,
            ClientError::Status {
                code: Code::NotFound,
                message: "nse-1".to_string(),
            },
        );

        let result = register(&chain, &target).await;
        assert!(matches!(result, Err(ClientError::Status { .. })));
        assert!(cache.contains(&target));
        assert_eq!(cache.leases(&target), 0);

        register(&chain, &target).await.unwrap_err();
        assert_eq!(cache.dial_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_target() {
        let chain = Chain::new().add(ClientConnStage::new(Arc::new(ConnectionCache::new())));
        let mut ctx = CallContext::background();

        let result = chain
            .head()
            .unregister(&mut ctx, NetworkServiceEndpoint::default())
            .await;
        assert_eq!(result, Err(ClientError::MissingTarget));
    }
}

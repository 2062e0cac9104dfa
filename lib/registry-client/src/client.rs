//! Registry client assembly

use async_trait::async_trait;
use registry_api::{NetworkServiceEndpoint, NetworkServiceEndpointQuery};
use std::sync::Arc;
use std::time::Duration;

use crate::begin::BeginStage;
use crate::chain::{Chain, EndpointStream};
use crate::clientconn::ClientConnStage;
use crate::clienturl::ClientUrlStage;
use crate::connect::ConnectStage;
use crate::dial::DialStage;
use crate::retry::{RetryPolicy, RetryStage};
use crate::{CallContext, ConnectionCache, Dialer, H2Dialer, Result, Target};

/// Network service endpoint registry operations
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn register(
        &self,
        ctx: &mut CallContext,
        nse: NetworkServiceEndpoint,
    ) -> Result<NetworkServiceEndpoint>;

    async fn find(
        &self,
        ctx: &mut CallContext,
        query: NetworkServiceEndpointQuery,
    ) -> Result<EndpointStream>;

    async fn unregister(&self, ctx: &mut CallContext, nse: NetworkServiceEndpoint) -> Result<()>;
}

#[async_trait]
impl RegistryClient for Chain {
    async fn register(
        &self,
        ctx: &mut CallContext,
        nse: NetworkServiceEndpoint,
    ) -> Result<NetworkServiceEndpoint> {
        self.head().register(ctx, nse).await
    }

    async fn find(
        &self,
        ctx: &mut CallContext,
        query: NetworkServiceEndpointQuery,
    ) -> Result<EndpointStream> {
        self.head().find(ctx, query).await
    }

    async fn unregister(&self, ctx: &mut CallContext, nse: NetworkServiceEndpoint) -> Result<()> {
        self.head().unregister(ctx, nse).await
    }
}

/// Collaborators and limits of a registry client
#[derive(Clone)]
pub struct ClientOptions {
    pub dialer: Arc<dyn Dialer>,
    pub cache: Arc<ConnectionCache>,
    pub retry: RetryPolicy,
    pub call_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            dialer: Arc::new(H2Dialer::new(Duration::from_secs(5))),
            cache: Arc::new(ConnectionCache::new()),
            retry: RetryPolicy::default(),
            call_timeout: None,
        }
    }
}

/// Build a client chain sending every call to `target`.
///
/// Stages run in the order begin, retry, address resolution, connection
/// lifecycle, dial, connect.
pub fn new_registry_client(target: Target, options: ClientOptions) -> Chain {
    Chain::new()
        .add(BeginStage::new(options.call_timeout))
        .add(RetryStage::new(options.retry))
        .add(ClientUrlStage::new(target))
        .add(ClientConnStage::new(options.cache.clone()))
        .add(DialStage::new(options.cache, options.dialer))
        .add(ConnectStage::new())
}

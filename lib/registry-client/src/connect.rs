//! Terminal stage issuing the remote call

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use registry_api::wire;
use registry_api::{NetworkServiceEndpoint, NetworkServiceEndpointQuery};
use tracing::debug;

use crate::chain::{EndpointStream, Next, Stage};
use crate::{CallContext, ClientError, Connection, Result};

/// Sends the request over the call's connection. Stages after this one are
/// never reached.
#[derive(Default)]
pub struct ConnectStage;

impl ConnectStage {
    pub fn new() -> Self {
        Self
    }

    fn connection(ctx: &CallContext) -> Result<Connection> {
        ctx.connection().cloned().ok_or_else(|| {
            ClientError::Transport("no connection established for call".to_string())
        })
    }
}

#[async_trait]
impl Stage for ConnectStage {
    fn name(&self) -> &'static str {
        "ConnectStage"
    }

    async fn register(
        &self,
        ctx: &mut CallContext,
        nse: NetworkServiceEndpoint,
        _next: Next<'_>,
    ) -> Result<NetworkServiceEndpoint> {
        let connection = Self::connection(ctx)?;
        debug!("Register {} via connection {}", nse.name, connection.id());

        let body = serde_json::to_vec(&nse)?;
        let response = ctx.run(connection.call(wire::REGISTER_PATH, body)).await?;
        Ok(serde_json::from_slice(&response)?)
    }

    async fn find(
        &self,
        ctx: &mut CallContext,
        query: NetworkServiceEndpointQuery,
        _next: Next<'_>,
    ) -> Result<EndpointStream> {
        let connection = Self::connection(ctx)?;
        debug!(
            "Find {:?} via connection {}",
            query.network_service_endpoint.name,
            connection.id()
        );

        let body = serde_json::to_vec(&query)?;
        let response = ctx.run(connection.call(wire::FIND_PATH, body)).await?;
        let endpoints: Vec<NetworkServiceEndpoint> = serde_json::from_slice(&response)?;
        Ok(stream::iter(endpoints.into_iter().map(Ok)).boxed())
    }

    async fn unregister(
        &self,
        ctx: &mut CallContext,
        nse: NetworkServiceEndpoint,
        _next: Next<'_>,
    ) -> Result<()> {
        let connection = Self::connection(ctx)?;
        debug!("Unregister {} via connection {}", nse.name, connection.id());

        let body = serde_json::to_vec(&nse)?;
        ctx.run(connection.call(wire::UNREGISTER_PATH, body)).await?;
        Ok(())
    }
}

//! Endpoint registry serving the registry protocol

use chrono::{DateTime, Duration, Utc};
use registry_api::{NetworkServiceEndpoint, NetworkServiceEndpointQuery};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{CoreError, EndpointStore, Result};

/// EndpointRegistry keeps the live view of registrations and writes them
/// through to the backing store
pub struct EndpointRegistry {
    namespace: String,
    expire_period: Duration,
    store: Arc<dyn EndpointStore>,
    // Map of endpoint name to the last registration
    endpoints: Arc<RwLock<HashMap<String, NetworkServiceEndpoint>>>,
}

impl EndpointRegistry {
    pub fn new(namespace: impl Into<String>, expire_period: Duration, store: Arc<dyn EndpointStore>) -> Self {
        Self {
            namespace: namespace.into(),
            expire_period,
            store,
            endpoints: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Namespace this registry writes to
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Register or refresh an endpoint
    pub async fn register(&self, mut nse: NetworkServiceEndpoint) -> Result<NetworkServiceEndpoint> {
        if nse.name.is_empty() {
            nse.name = generate_name(&nse);
        }
        validate_name(&nse.name)?;

        if nse.expiration_time.is_none() {
            nse.expiration_time = Some(Utc::now() + self.expire_period);
        }

        // Held across the store write so the store and the view agree
        let mut endpoints = self.endpoints.write().await;
        self.store.create_or_update(&self.namespace, &nse).await?;
        endpoints.insert(nse.name.clone(), nse.clone());

        debug!("Registered endpoint: {}/{}", self.namespace, nse.name);
        Ok(nse)
    }

    /// Find live endpoints matching a query
    pub async fn find(&self, query: &NetworkServiceEndpointQuery) -> Result<Vec<NetworkServiceEndpoint>> {
        if query.watch {
            return Err(CoreError::Unimplemented("watch is not supported".to_string()));
        }

        let now = Utc::now();
        let endpoints = self.endpoints.read().await;
        let mut found: Vec<NetworkServiceEndpoint> = endpoints
            .values()
            .filter(|nse| !nse.is_expired(now) && query.matches(nse))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));

        debug!("Found {} endpoints", found.len());
        Ok(found)
    }

    /// Remove an endpoint from the store and the live view
    pub async fn unregister(&self, nse: &NetworkServiceEndpoint) -> Result<()> {
        validate_name(&nse.name)?;

        let mut endpoints = self.endpoints.write().await;
        match self.store.delete(&self.namespace, &nse.name).await {
            Ok(()) | Err(CoreError::EndpointNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        endpoints.remove(&nse.name);

        debug!("Unregistered endpoint: {}/{}", self.namespace, nse.name);
        Ok(())
    }

    /// Drop every registration that expired at `now`, returning their names.
    ///
    /// An entry whose store delete fails stays in the view and is retried on
    /// the next call.
    pub async fn expire(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut endpoints = self.endpoints.write().await;
        let candidates: Vec<String> = endpoints
            .values()
            .filter(|nse| nse.is_expired(now))
            .map(|nse| nse.name.clone())
            .collect();

        let mut expired = Vec::with_capacity(candidates.len());
        for name in candidates {
            match self.store.delete(&self.namespace, &name).await {
                Ok(()) | Err(CoreError::EndpointNotFound(_)) => {
                    info!("Expired endpoint: {}/{}", self.namespace, name);
                    endpoints.remove(&name);
                    expired.push(name);
                }
                Err(e) => {
                    warn!("Failed to delete expired endpoint {}/{}: {}", self.namespace, name, e);
                }
            }
        }

        expired
    }

    /// Get a live registration by name
    pub async fn get(&self, name: &str) -> Option<NetworkServiceEndpoint> {
        let endpoints = self.endpoints.read().await;
        endpoints.get(name).cloned()
    }

    /// Get count of live registrations
    pub async fn endpoint_count(&self) -> usize {
        let endpoints = self.endpoints.read().await;
        endpoints.len()
    }
}

fn generate_name(nse: &NetworkServiceEndpoint) -> String {
    let prefix = nse
        .network_service_names
        .first()
        .map(|ns| ns.as_str())
        .unwrap_or("nse");
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CoreError::InvalidEndpoint("endpoint name is empty".to_string()));
    }
    if name.contains('/') {
        return Err(CoreError::InvalidEndpoint(format!("endpoint name {:?} contains '/'", name)));
    }
    Ok(())
}

//! Backing store for registrations
//!
//! The store is a keyed collection of `NetworkServiceEndpoint` resources per
//! namespace. Writes are create-or-replace so the last writer wins.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::Client;
use registry_api::v1::NetworkServiceEndpoint;
use registry_api::NetworkServiceEndpoint as RegistryEndpoint;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{CoreError, Result};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "registry-k8s";

/// Durable collection of endpoint registrations
#[async_trait]
pub trait EndpointStore: Send + Sync {
    /// List every stored endpoint in a namespace
    async fn list(&self, namespace: &str) -> Result<Vec<NetworkServiceEndpoint>>;

    /// Create the endpoint or replace the stored one with the same name
    async fn create_or_update(&self, namespace: &str, endpoint: &RegistryEndpoint) -> Result<()>;

    /// Delete an endpoint; `CoreError::EndpointNotFound` if it does not exist
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Store backed by `NetworkServiceEndpoint` custom resources
pub struct KubeEndpointStore {
    client: Client,
}

impl KubeEndpointStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster configuration
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self { client })
    }

    fn api(&self, namespace: &str) -> Api<NetworkServiceEndpoint> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl EndpointStore for KubeEndpointStore {
    async fn list(&self, namespace: &str) -> Result<Vec<NetworkServiceEndpoint>> {
        let list = self.api(namespace).list(&ListParams::default()).await?;
        debug!("Listed {} endpoints in {}", list.items.len(), namespace);
        Ok(list.items)
    }

    async fn create_or_update(&self, namespace: &str, endpoint: &RegistryEndpoint) -> Result<()> {
        let resource = NetworkServiceEndpoint::from_registry(namespace, endpoint.clone());
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.api(namespace)
            .patch(&endpoint.name, &params, &Patch::Apply(&resource))
            .await?;
        debug!("Applied endpoint {}/{}", namespace, endpoint.name);
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                debug!("Deleted endpoint {}/{}", namespace, name);
                Ok(())
            }
            Err(kube::Error::Api(response)) if response.code == 404 => {
                Err(CoreError::EndpointNotFound(format!("{}/{}", namespace, name)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store, used for the `memory` store mode and in tests
#[derive(Clone, Default)]
pub struct MemoryEndpointStore {
    // Keyed by (namespace, name)
    items: Arc<RwLock<BTreeMap<(String, String), NetworkServiceEndpoint>>>,
}

impl MemoryEndpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a stored endpoint
    pub async fn get(&self, namespace: &str, name: &str) -> Option<RegistryEndpoint> {
        let items = self.items.read().await;
        items
            .get(&(namespace.to_string(), name.to_string()))
            .map(|resource| resource.endpoint().clone())
    }

    /// Number of stored endpoints across all namespaces
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl EndpointStore for MemoryEndpointStore {
    async fn list(&self, namespace: &str) -> Result<Vec<NetworkServiceEndpoint>> {
        let items = self.items.read().await;
        Ok(items
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, resource)| resource.clone())
            .collect())
    }

    async fn create_or_update(&self, namespace: &str, endpoint: &RegistryEndpoint) -> Result<()> {
        let resource = NetworkServiceEndpoint::from_registry(namespace, endpoint.clone());
        let mut items = self.items.write().await;
        items.insert((namespace.to_string(), endpoint.name.clone()), resource);
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let mut items = self.items.write().await;
        items
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| CoreError::EndpointNotFound(format!("{}/{}", namespace, name)))
    }
}

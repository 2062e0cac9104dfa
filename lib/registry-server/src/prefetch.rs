//! Startup reconciliation of the backing store
//!
//! One pass over the stored endpoints: expired entries are deleted, live ones
//! are registered again through the registry client so the running server's
//! view matches the store. Failures are logged per entry and never stop the
//! pass.

use chrono::Utc;
use registry_client::{CallContext, RegistryClient};
use registry_core::EndpointStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of one prefetch pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrefetchSummary {
    /// Whether the store listing failed, aborting the pass
    pub list_failed: bool,
    pub listed: usize,
    pub deleted: usize,
    pub registered: usize,
    pub failed: usize,
}

/// Reconciles the store of one namespace with the running server
pub struct Prefetch {
    namespace: String,
    store: Arc<dyn EndpointStore>,
    client: Arc<dyn RegistryClient>,
}

impl Prefetch {
    pub fn new(
        namespace: impl Into<String>,
        store: Arc<dyn EndpointStore>,
        client: Arc<dyn RegistryClient>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            store,
            client,
        }
    }

    /// Run the pass; calls are abandoned once `cancel` fires
    pub async fn run(&self, cancel: &CancellationToken) -> PrefetchSummary {
        let mut summary = PrefetchSummary::default();

        let listed = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Prefetch cancelled before listing endpoints");
                return summary;
            }
            listed = self.store.list(&self.namespace) => listed,
        };
        let resources = match listed {
            Ok(resources) => resources,
            Err(e) => {
                warn!("Failed to list endpoints in namespace {}: {}", self.namespace, e);
                summary.list_failed = true;
                return summary;
            }
        };
        summary.listed = resources.len();

        let now = Utc::now();
        for resource in resources {
            if cancel.is_cancelled() {
                let processed = summary.deleted + summary.registered + summary.failed;
                warn!(
                    "Prefetch cancelled, {} endpoints left unprocessed",
                    summary.listed - processed
                );
                break;
            }

            let name = resource.name().to_string();
            let nse = resource.endpoint().clone();

            if nse.is_expired(now) {
                info!("Found a leaked endpoint '{}', trying to delete it", name);
                let deleted = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err("cancelled".to_string()),
                    deleted = self.store.delete(&self.namespace, &name) => deleted.map_err(|e| e.to_string()),
                };
                match deleted {
                    Ok(()) => {
                        info!("Leaked endpoint '{}' has been deleted", name);
                        summary.deleted += 1;
                    }
                    Err(e) => {
                        warn!("Failed to delete endpoint '{}': {}", name, e);
                        summary.failed += 1;
                    }
                }
                continue;
            }

            info!("Found a live endpoint '{}', trying to manage it", name);
            let mut ctx = CallContext::new(cancel.child_token());
            match self.client.register(&mut ctx, nse).await {
                Ok(_) => {
                    info!("Live endpoint '{}' from the store is managed", name);
                    summary.registered += 1;
                }
                Err(e) => {
                    warn!("Failed to register endpoint '{}': {}", name, e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Prefetch of namespace {} finished: {} deleted, {} registered, {} failed",
            self.namespace, summary.deleted, summary.registered, summary.failed
        );
        summary
    }
}

//! Expiration sweeper

use chrono::Utc;
use registry_core::EndpointRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Periodically drop registrations whose expiration has passed
pub fn spawn_expire_sweeper(
    cancel: CancellationToken,
    registry: Arc<EndpointRegistry>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Expiration sweeper started (every {:?})", period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let expired = registry.expire(Utc::now()).await;
                    if !expired.is_empty() {
                        debug!("Expired {} endpoints", expired.len());
                    }
                }
            }
        }

        info!("Expiration sweeper stopped");
    })
}

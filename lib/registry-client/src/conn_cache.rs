//! Connection cache with single-flight dialing
//!
//! At most one connection exists per target. Concurrent acquirers of a target
//! that has no live connection join the one in-flight dial and all observe its
//! outcome.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{Connection, Result, Target};

/// Connection handle the cache can track
pub trait CachedConnection: Clone + Send + Sync + 'static {
    fn id(&self) -> u64;
    fn is_closed(&self) -> bool;
}

type PendingDial<C> = Shared<BoxFuture<'static, Result<C>>>;

enum Slot<C> {
    Dialing { generation: u64, pending: PendingDial<C> },
    Ready { connection: C, leases: usize },
}

/// Owns the live connections, keyed by target
pub struct ConnectionCache<C: CachedConnection = Connection> {
    slots: Mutex<HashMap<Target, Slot<C>>>,
    generation: AtomicU64,
    dials: AtomicU64,
}

impl<C: CachedConnection> ConnectionCache<C> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            dials: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Target, Slot<C>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get the live connection for `target`, dialing it with `dial` if needed.
    ///
    /// `dial` only runs when no live connection and no dial in flight exist
    /// for the target. Each successful acquire takes a lease that must be
    /// returned with [`ConnectionCache::release`].
    pub async fn acquire<F, Fut>(&self, target: &Target, dial: F) -> Result<C>
    where
        F: FnOnce(Target) -> Fut,
        Fut: Future<Output = Result<C>> + Send + 'static,
    {
        let (generation, pending) = {
            let mut slots = self.lock();
            let joined = match slots.get_mut(target) {
                Some(Slot::Ready { connection, leases }) if !connection.is_closed() => {
                    *leases += 1;
                    return Ok(connection.clone());
                }
                Some(Slot::Dialing { generation, pending }) => Some((*generation, pending.clone())),
                _ => None,
            };

            match joined {
                Some(joined) => {
                    debug!("Joining in-flight dial to {}", target);
                    joined
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst);
                    self.dials.fetch_add(1, Ordering::SeqCst);
                    let pending = dial(target.clone()).boxed().shared();
                    slots.insert(
                        target.clone(),
                        Slot::Dialing {
                            generation,
                            pending: pending.clone(),
                        },
                    );
                    (generation, pending)
                }
            }
        };

        let result = pending.await;

        let mut slots = self.lock();
        let ours = matches!(
            slots.get(target),
            Some(Slot::Dialing { generation: g, .. }) if *g == generation
        );
        match &result {
            Ok(connection) => {
                if ours {
                    slots.insert(
                        target.clone(),
                        Slot::Ready {
                            connection: connection.clone(),
                            leases: 1,
                        },
                    );
                } else if let Some(Slot::Ready {
                    connection: cached,
                    leases,
                }) = slots.get_mut(target)
                {
                    if cached.id() == connection.id() {
                        *leases += 1;
                    }
                }
            }
            Err(e) => {
                if ours {
                    warn!("Dial to {} failed: {}", target, e);
                    slots.remove(target);
                }
            }
        }

        result
    }

    /// Return a lease taken by `acquire`; the connection stays open
    pub fn release(&self, target: &Target) {
        let mut slots = self.lock();
        if let Some(Slot::Ready { leases, .. }) = slots.get_mut(target) {
            *leases = leases.saturating_sub(1);
        }
    }

    /// Drop the cached connection `id` for `target` so the next acquire redials
    pub fn evict(&self, target: &Target, id: u64) {
        let mut slots = self.lock();
        let matches = matches!(
            slots.get(target),
            Some(Slot::Ready { connection, .. }) if connection.id() == id
        );
        if matches {
            slots.remove(target);
            debug!("Evicted connection {} to {}", id, target);
        }
    }

    /// Outstanding leases on the connection to `target`
    pub fn leases(&self, target: &Target) -> usize {
        match self.lock().get(target) {
            Some(Slot::Ready { leases, .. }) => *leases,
            _ => 0,
        }
    }

    /// Whether a live connection to `target` is cached
    pub fn contains(&self, target: &Target) -> bool {
        matches!(
            self.lock().get(target),
            Some(Slot::Ready { connection, .. }) if !connection.is_closed()
        )
    }

    /// Number of dials started since creation
    pub fn dial_count(&self) -> u64 {
        self.dials.load(Ordering::SeqCst)
    }
}

impl<C: CachedConnection> Default for ConnectionCache<C> {
    fn default() -> Self {
        Self::new()
    }
}

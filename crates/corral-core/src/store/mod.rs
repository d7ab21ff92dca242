//! Discovery store abstraction
//!
//! The store is an external, assumed-consistent key-value service with
//! TTL expiry (etcd in production). Push notifications exist but proved
//! unreliable across reconnects, so `watch` is advisory only: every
//! component polls, and `watch` handles are a bonus for callers that
//! want early wake-ups.

mod etcd;
mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::StoreError;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

/// Smallest TTL accepted by [`spawn_registration`]. Renewal runs every
/// `ttl - 10s`, so anything shorter would produce a non-positive
/// interval.
pub const MIN_REGISTRATION_TTL: Duration = Duration::from_secs(11);

/// Client handle to the shared discovery store.
///
/// Absent keys are a first-class outcome (`Ok(None)`), distinct from
/// transport failure.
#[async_trait]
pub trait DiscoveryStore: Send + Sync {
    /// Read one key. `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Upsert one key. A `ttl` of `None` never expires.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Immediate children of `prefix`, keyed by basename. The map is
    /// ordered so equality checks are independent of store iteration
    /// order.
    async fn list(&self, prefix: &str) -> Result<BTreeMap<String, String>, StoreError>;

    /// Advisory change notifications for one key. The receiver yields
    /// the current value (`None` once deleted or expired). Correctness
    /// must never depend on this; polling is authoritative.
    async fn watch(&self, key: &str) -> Result<watch::Receiver<Option<String>>, StoreError>;
}

/// Keep `key` registered with a perpetual lease.
///
/// Sets `(key, value, ttl)` immediately and again every `ttl - 10s`
/// until the token is cancelled. A failed renewal is logged and retried
/// on the next tick; the key may expire and reappear in between, which
/// callers tolerate as degraded behavior rather than a fatal condition.
pub fn spawn_registration(
    store: Arc<dyn DiscoveryStore>,
    key: String,
    value: String,
    ttl: Duration,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, StoreError> {
    if ttl < MIN_REGISTRATION_TTL {
        return Err(StoreError::TtlTooShort(ttl));
    }
    let renew_every = ttl - Duration::from_secs(10);

    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(renew_every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(key = %key, "registration loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match store.set(&key, &value, Some(ttl)).await {
                        Ok(()) => debug!(key = %key, "registration renewed"),
                        Err(e) => warn!(
                            key = %key,
                            error = %e,
                            "registration renewal failed, retrying on next tick"
                        ),
                    }
                }
            }
        }
    }))
}

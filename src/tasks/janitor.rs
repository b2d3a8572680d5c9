//! Cache Janitor Task
//!
//! Background task that periodically removes expired cache entries, so keys
//! that are never read again do not hold memory until evicted.

use std::hash::Hash;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::cache::WeakTtlCache;

/// Spawns the janitor loop for one cache.
///
/// The task sleeps for `interval` between passes and exits when the cache
/// has been dropped or janitor `id` is no longer the cache's active one.
/// It holds only a weak reference, so it never keeps a cache alive.
///
/// Must be called from within a tokio runtime.
pub(crate) fn spawn_janitor<K, V>(
    cache: WeakTtlCache<K, V>,
    interval: Duration,
    id: u64,
) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        debug!(janitor_id = id, ?interval, "starting cache janitor");

        loop {
            tokio::time::sleep(interval).await;

            let Some(cache) = cache.upgrade() else {
                break;
            };
            match cache.janitor_pass(id) {
                Some(0) => trace!(janitor_id = id, "janitor: no expired entries found"),
                Some(removed) => debug!(janitor_id = id, removed, "janitor: removed expired entries"),
                None => break,
            }
        }

        debug!(janitor_id = id, "cache janitor stopped");
    })
}

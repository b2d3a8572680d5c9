//! Cache Store Module
//!
//! Bounded TTL cache with sampled eviction, coalesced loads and an optional
//! background janitor.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use rand::Rng;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheStats};
use crate::error::LookupError;
use crate::tasks::spawn_janitor;

/// Default number of entries sampled per eviction decision.
pub const DEFAULT_EVICTION_EFFORT: usize = 10;

// == Removal ==
/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// TTL elapsed; removed on read, by the janitor or as an eviction victim
    Expired,
    /// Removed to bring the cache back under capacity
    Evicted,
    /// Removed by an explicit delete
    Deleted,
}

/// Callback invoked for every removed entry.
///
/// Runs after the cache's internal locks are released, so it may call any
/// cache method, including the janitor controls.
pub type RemovalListener<K, V> = Arc<dyn Fn(&K, &V, RemovalCause) + Send + Sync>;

type Removal<K, V> = (K, V, RemovalCause);
type LoadOutcome<V> = Option<Result<V, LookupError>>;

// == Internal State ==
struct InFlight<V> {
    id: u64,
    rx: watch::Receiver<LoadOutcome<V>>,
}

struct State<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// Dense key list for O(1) random sampling; `CacheEntry::slot` indexes it
    keys: Vec<K>,
    in_flight: HashMap<K, InFlight<V>>,
    next_load_id: u64,
    stats: CacheStats,
}

struct Janitor {
    id: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct JanitorSlot {
    next_id: u64,
    current: Option<Janitor>,
}

struct Shared<K, V> {
    state: Mutex<State<K, V>>,
    /// Held while a janitor pass purges, so stopping waits for the purge
    janitor: Mutex<JanitorSlot>,
    capacity: usize,
    eviction_effort: usize,
    default_ttl: Duration,
    listener: Option<RemovalListener<K, V>>,
}

impl<K, V> Drop for Shared<K, V> {
    fn drop(&mut self) {
        let slot = self.janitor.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(janitor) = slot.current.take() {
            janitor.handle.abort();
        }
    }
}

enum Lookup<V> {
    Hit(V),
    Wait(u64, watch::Receiver<LoadOutcome<V>>),
    Lead(u64, watch::Sender<LoadOutcome<V>>),
}

impl<K, V> State<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            keys: Vec::new(),
            in_flight: HashMap::new(),
            next_load_id: 0,
            stats: CacheStats::new(),
        }
    }

    fn insert(&mut self, key: K, value: V, ttl: Duration, now: Instant) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.refresh(value, ttl, now);
            return;
        }
        let slot = self.keys.len();
        self.keys.push(key.clone());
        self.entries.insert(key, CacheEntry::new(value, ttl, now, slot));
    }

    fn remove_entry(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        let slot = entry.slot;
        self.keys.swap_remove(slot);
        if let Some(moved) = self.keys.get(slot) {
            if let Some(moved_entry) = self.entries.get_mut(moved) {
                moved_entry.slot = slot;
            }
        }
        Some(entry.value)
    }

    /// Returns the live value for `key`, dropping it if it has expired.
    fn get_live(&mut self, key: &K, now: Instant, removed: &mut Vec<Removal<K, V>>) -> Option<V> {
        let expired = self.entries.get(key)?.is_expired_at(now);
        if !expired {
            return self.entries.get(key).map(|entry| entry.value.clone());
        }
        if let Some(value) = self.remove_entry(key) {
            self.stats.record_expirations(1);
            removed.push((key.clone(), value, RemovalCause::Expired));
        }
        None
    }

    fn sample_victim<R: Rng>(&self, rng: &mut R, effort: usize) -> Option<(K, Instant)> {
        if self.keys.is_empty() {
            return None;
        }
        let mut victim: Option<(&K, Instant)> = None;
        for _ in 0..effort.max(1) {
            let key = &self.keys[rng.random_range(0..self.keys.len())];
            let Some(entry) = self.entries.get(key) else {
                continue;
            };
            if victim.map_or(true, |(_, at)| entry.expires_at < at) {
                victim = Some((key, entry.expires_at));
            }
        }
        victim.map(|(key, at)| (key.clone(), at))
    }

    /// Evicts sampled victims with the earliest deadline until `capacity` holds.
    fn enforce_capacity(
        &mut self,
        capacity: usize,
        effort: usize,
        now: Instant,
        removed: &mut Vec<Removal<K, V>>,
    ) {
        let mut rng = rand::rng();
        while self.entries.len() > capacity {
            let Some((victim, expires_at)) = self.sample_victim(&mut rng, effort) else {
                break;
            };
            let Some(value) = self.remove_entry(&victim) else {
                break;
            };
            let cause = if now >= expires_at {
                self.stats.record_expirations(1);
                RemovalCause::Expired
            } else {
                self.stats.record_eviction();
                RemovalCause::Evicted
            };
            removed.push((victim, value, cause));
        }
    }

    fn purge_expired(&mut self, now: Instant, removed: &mut Vec<Removal<K, V>>) -> usize {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        let count = expired.len();
        for key in expired {
            if let Some(value) = self.remove_entry(&key) {
                removed.push((key, value, RemovalCause::Expired));
            }
        }
        self.stats.record_expirations(count);
        count
    }

    fn release_in_flight(&mut self, key: &K, id: u64) {
        if self.in_flight.get(key).map(|f| f.id) == Some(id) {
            self.in_flight.remove(key);
        }
    }

    fn sync_len(&mut self) {
        let len = self.entries.len();
        self.stats.set_total_entries(len);
    }
}

impl<K, V> Shared<K, V> {
    fn lock_state(&self) -> MutexGuard<'_, State<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_janitor(&self) -> MutexGuard<'_, JanitorSlot> {
        self.janitor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, removed: Vec<Removal<K, V>>) {
        if let Some(listener) = &self.listener {
            for (key, value, cause) in &removed {
                listener(key, value, *cause);
            }
        }
    }
}

/// Clears the in-flight marker if the loading caller is dropped mid-load.
struct LoadGuard<'a, K: Eq + Hash + Clone, V: Clone> {
    shared: &'a Shared<K, V>,
    key: Option<K>,
    id: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> LoadGuard<'_, K, V> {
    fn disarm(&mut self) {
        self.key = None;
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Drop for LoadGuard<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.shared.lock_state().release_in_flight(&key, self.id);
        }
    }
}

// == Builder ==
/// Configures a [`TtlCache`] before it is shared.
pub struct TtlCacheBuilder<K, V> {
    default_ttl: Duration,
    capacity: usize,
    eviction_effort: usize,
    listener: Option<RemovalListener<K, V>>,
}

impl<K, V> TtlCacheBuilder<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Number of entries sampled per eviction decision (at least one).
    pub fn eviction_effort(mut self, effort: usize) -> Self {
        self.eviction_effort = effort.max(1);
        self
    }

    pub fn removal_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&K, &V, RemovalCause) + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn build(self) -> TtlCache<K, V> {
        TtlCache {
            shared: Arc::new(Shared {
                state: Mutex::new(State::new()),
                janitor: Mutex::new(JanitorSlot::default()),
                capacity: self.capacity,
                eviction_effort: self.eviction_effort,
                default_ttl: self.default_ttl,
                listener: self.listener,
            }),
        }
    }
}

// == TTL Cache ==
/// Concurrent key/value cache with per-entry TTL and a hard capacity bound.
///
/// Cloning is cheap and yields a handle to the same cache. Expired entries
/// are never served: every read checks the deadline, independent of the
/// janitor. When an insert pushes the entry count over capacity, the entry
/// with the earliest deadline among `eviction_effort` random samples is
/// evicted, repeatedly, until the bound holds again.
pub struct TtlCache<K, V> {
    shared: Arc<Shared<K, V>>,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V> fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("capacity", &self.shared.capacity)
            .field("eviction_effort", &self.shared.eviction_effort)
            .field("default_ttl", &self.shared.default_ttl)
            .finish_non_exhaustive()
    }
}

/// Non-owning handle held by the janitor task.
pub(crate) struct WeakTtlCache<K, V> {
    shared: Weak<Shared<K, V>>,
}

impl<K, V> WeakTtlCache<K, V> {
    pub(crate) fn upgrade(&self) -> Option<TtlCache<K, V>> {
        self.shared.upgrade().map(|shared| TtlCache { shared })
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a cache with the given default TTL and capacity.
    pub fn new(default_ttl: Duration, capacity: usize) -> Self {
        Self::builder(default_ttl, capacity).build()
    }

    pub fn builder(default_ttl: Duration, capacity: usize) -> TtlCacheBuilder<K, V> {
        TtlCacheBuilder {
            default_ttl,
            capacity,
            eviction_effort: DEFAULT_EVICTION_EFFORT,
            listener: None,
        }
    }

    // == Put ==
    /// Inserts or overwrites `key` with the default TTL.
    pub fn put(&self, key: K, value: V) {
        self.put_with_ttl(key, value, self.shared.default_ttl);
    }

    /// Inserts or overwrites `key`, expiring `ttl` from now.
    ///
    /// Evicts before returning if the insert pushed the cache over capacity.
    pub fn put_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let removed = {
            let mut state = self.shared.lock_state();
            let now = Instant::now();
            let mut removed = Vec::new();
            state.insert(key, value, ttl, now);
            state.enforce_capacity(
                self.shared.capacity,
                self.shared.eviction_effort,
                now,
                &mut removed,
            );
            state.sync_len();
            removed
        };
        self.shared.notify(removed);
    }

    // == Get ==
    /// Returns the value for `key` if present and not expired.
    ///
    /// An expired entry found here is removed on the spot.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut removed = Vec::new();
        let value = {
            let mut state = self.shared.lock_state();
            let value = state.get_live(key, Instant::now(), &mut removed);
            match value {
                Some(_) => state.stats.record_hit(),
                None => state.stats.record_miss(),
            }
            state.sync_len();
            value
        };
        self.shared.notify(removed);
        value
    }

    // == Delete ==
    /// Removes `key` immediately, returning its value if it was present.
    pub fn delete(&self, key: &K) -> Option<V> {
        let value = {
            let mut state = self.shared.lock_state();
            let value = state.remove_entry(key);
            state.sync_len();
            value
        };
        if let Some(v) = &value {
            if let Some(listener) = &self.shared.listener {
                listener(key, v, RemovalCause::Deleted);
            }
        }
        value
    }

    // == Get Or Load ==
    /// Returns the cached value for `key`, computing it with `loader` on a miss.
    ///
    /// At most one loader runs per key at any time: concurrent callers for the
    /// same missing key wait for that single computation and all receive its
    /// result or its error. Errors are not cached. If the loading caller is
    /// dropped before finishing, a waiting caller takes over with its own
    /// loader.
    pub async fn get_or_load<F, Fut>(&self, key: K, loader: F) -> Result<V, LookupError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, LookupError>>,
    {
        let mut counted = false;
        loop {
            let mut removed = Vec::new();
            let lookup = {
                let mut state = self.shared.lock_state();
                let lookup = match state.get_live(&key, Instant::now(), &mut removed) {
                    Some(value) => Lookup::Hit(value),
                    None => match state.in_flight.get(&key) {
                        Some(in_flight) => Lookup::Wait(in_flight.id, in_flight.rx.clone()),
                        None => {
                            state.next_load_id += 1;
                            let id = state.next_load_id;
                            let (tx, rx) = watch::channel(None);
                            state.in_flight.insert(key.clone(), InFlight { id, rx });
                            Lookup::Lead(id, tx)
                        }
                    },
                };
                if !counted {
                    match lookup {
                        Lookup::Hit(_) => state.stats.record_hit(),
                        _ => state.stats.record_miss(),
                    }
                    counted = true;
                }
                state.sync_len();
                lookup
            };
            self.shared.notify(removed);

            match lookup {
                Lookup::Hit(value) => return Ok(value),
                Lookup::Lead(id, tx) => return self.load(key, id, tx, loader).await,
                Lookup::Wait(id, mut rx) => {
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(outcome) => outcome.clone(),
                        Err(_) => None,
                    };
                    if let Some(result) = outcome {
                        return result;
                    }
                    // The loading caller went away without publishing.
                    self.shared.lock_state().release_in_flight(&key, id);
                    debug!("in-flight load abandoned, retrying");
                }
            }
        }
    }

    async fn load<F, Fut>(
        &self,
        key: K,
        id: u64,
        tx: watch::Sender<LoadOutcome<V>>,
        loader: F,
    ) -> Result<V, LookupError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, LookupError>>,
    {
        let mut guard = LoadGuard {
            shared: &self.shared,
            key: Some(key.clone()),
            id,
        };
        let result = loader().await;

        let removed = {
            let mut state = self.shared.lock_state();
            let mut removed = Vec::new();
            state.release_in_flight(&key, id);
            state.stats.record_load(result.is_err());
            if let Ok(value) = &result {
                let now = Instant::now();
                state.insert(key, value.clone(), self.shared.default_ttl, now);
                state.enforce_capacity(
                    self.shared.capacity,
                    self.shared.eviction_effort,
                    now,
                    &mut removed,
                );
            }
            state.sync_len();
            removed
        };
        guard.disarm();

        tx.send_replace(Some(result.clone()));
        self.shared.notify(removed);
        result
    }

    // == Purge Expired ==
    /// Removes all expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let (count, removed) = self.collect_expired();
        self.shared.notify(removed);
        count
    }

    fn collect_expired(&self) -> (usize, Vec<Removal<K, V>>) {
        let mut state = self.shared.lock_state();
        let mut removed = Vec::new();
        let count = state.purge_expired(Instant::now(), &mut removed);
        state.sync_len();
        (count, removed)
    }

    // == Janitor ==
    /// Starts the background janitor, replacing one that is already running.
    ///
    /// Returns `false` when `interval` is zero or no tokio runtime is
    /// available to host the task.
    pub fn start_janitor(&self, interval: Duration) -> bool {
        if interval.is_zero() {
            warn!("janitor interval is zero, not starting");
            return false;
        }
        if Handle::try_current().is_err() {
            warn!("no tokio runtime available, janitor not started");
            return false;
        }

        let mut slot = self.shared.lock_janitor();
        if let Some(previous) = slot.current.take() {
            previous.handle.abort();
        }
        slot.next_id += 1;
        let id = slot.next_id;
        let weak = WeakTtlCache {
            shared: Arc::downgrade(&self.shared),
        };
        let handle = spawn_janitor(weak, interval, id);
        slot.current = Some(Janitor { id, handle });
        true
    }

    /// Stops the janitor. Safe to call repeatedly.
    ///
    /// Once this returns no janitor pass is running and none will start.
    pub fn stop_janitor(&self) {
        let mut slot = self.shared.lock_janitor();
        if let Some(janitor) = slot.current.take() {
            janitor.handle.abort();
        }
    }

    pub fn is_janitor_running(&self) -> bool {
        self.shared.lock_janitor().current.is_some()
    }

    /// Runs one janitor pass if janitor `id` is still the active one.
    ///
    /// Entries are purged under the janitor lock, so a concurrent
    /// `stop_janitor` waits for the purge. The removal listener runs after
    /// the lock is released and may call back into the janitor API; it can
    /// therefore still report entries of the final pass after
    /// `stop_janitor` has returned.
    pub(crate) fn janitor_pass(&self, id: u64) -> Option<usize> {
        let (count, removed) = {
            let slot = self.shared.lock_janitor();
            if slot.current.as_ref().map(|j| j.id) != Some(id) {
                return None;
            }
            self.collect_expired()
        };
        self.shared.notify(removed);
        Some(count)
    }

    // == Introspection ==
    /// Returns the number of stored entries, including expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.shared.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn default_ttl(&self) -> Duration {
        self.shared.default_ttl
    }

    /// Returns a snapshot of the cache statistics.
    pub fn stats(&self) -> CacheStats {
        let state = self.shared.lock_state();
        let mut stats = state.stats.clone();
        stats.set_total_entries(state.entries.len());
        stats
    }

    #[cfg(test)]
    pub(crate) fn index_is_consistent(&self) -> bool {
        let state = self.shared.lock_state();
        state.keys.len() == state.entries.len()
            && state
                .keys
                .iter()
                .enumerate()
                .all(|(slot, key)| state.entries.get(key).map(|e| e.slot) == Some(slot))
    }
}

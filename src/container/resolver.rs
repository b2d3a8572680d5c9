//! Container Id Resolver
//!
//! Maps a pid to a container id via its cgroup paths, caching per processor.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::cache::{CacheStats, RemovalCause, TtlCache};
use crate::config::CacheSettings;
use crate::container::{CgroupMatcher, CgroupReader};
use crate::error::LookupError;
use crate::models::Pid;
use crate::tasks::run_blocking;

// == Container Id Resolver ==
/// Cgroup reader plus matching rule, optionally fronted by a TTL cache.
///
/// Resolved results are cached including "no container", so a host process
/// costs one cgroup read per TTL. Reader failures are not cached. Without a
/// cache, lookups still go through a zero-capacity `TtlCache` so concurrent
/// callers for one pid share a single cgroup read.
pub struct ContainerIdResolver {
    matcher: Arc<CgroupMatcher>,
    reader: Arc<dyn CgroupReader>,
    cache: TtlCache<Pid, Option<String>>,
    cached: bool,
    lookup_timeout: Option<Duration>,
}

impl ContainerIdResolver {
    /// Creates a resolver that reads cgroups on every call.
    pub fn new(matcher: CgroupMatcher, reader: Arc<dyn CgroupReader>) -> Self {
        Self {
            matcher: Arc::new(matcher),
            reader,
            cache: TtlCache::new(Duration::ZERO, 0),
            cached: false,
            lookup_timeout: None,
        }
    }

    /// Adds a cache and starts its janitor at the settings' cleanup interval.
    pub fn with_cache(mut self, settings: &CacheSettings, instance_id: u32) -> Self {
        let cache = TtlCache::builder(settings.ttl(), settings.capacity)
            .eviction_effort(settings.eviction_effort)
            .removal_listener(move |pid: &Pid, _: &Option<String>, cause: RemovalCause| {
                debug!(instance_id, pid, ?cause, "evicted cached container id");
            })
            .build();
        if let Some(interval) = settings.cleanup_interval() {
            cache.start_janitor(interval);
        }
        self.cache = cache;
        self.cached = true;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    // == Resolve ==
    /// Returns the container id of `pid`, `None` when it runs outside one.
    pub async fn resolve(&self, pid: Pid) -> Result<Option<String>, LookupError> {
        let reader = Arc::clone(&self.reader);
        let matcher = Arc::clone(&self.matcher);
        let timeout = self.lookup_timeout;
        let load = move || {
            run_blocking(timeout, move || match reader.process_cgroup_paths(pid) {
                Ok(paths) => Ok(matcher.container_id(&paths)),
                Err(LookupError::CgroupsUnavailable) => Ok(None),
                Err(err) => Err(err),
            })
        };

        self.cache.get_or_load(pid, load).await
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn stats(&self) -> Option<CacheStats> {
        self.cached.then(|| self.cache.stats())
    }

    /// Stops the cache janitor. In-flight lookups run to completion.
    pub fn close(&self) {
        self.cache.stop_janitor();
    }
}

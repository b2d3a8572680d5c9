//! Process Metadata Cache
//!
//! Shares provider results across every processor instance.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStats, TtlCache};
use crate::config::CacheSettings;
use crate::error::LookupError;
use crate::models::{Pid, ProcessMetadata};
use crate::process::ProcessMetadataProvider;
use crate::tasks::run_blocking;

// == Process Metadata Cache ==
/// Provider wrapped in a bounded TTL cache keyed by pid.
///
/// Build one at startup and hand the same `Arc` to every processor.
/// Concurrent misses for one pid result in a single provider call.
pub struct ProcessMetadataCache {
    cache: TtlCache<Pid, Arc<ProcessMetadata>>,
    provider: Arc<dyn ProcessMetadataProvider>,
    lookup_timeout: Option<Duration>,
}

impl ProcessMetadataCache {
    pub fn new(provider: Arc<dyn ProcessMetadataProvider>, settings: &CacheSettings) -> Self {
        let cache = TtlCache::builder(settings.ttl(), settings.capacity)
            .eviction_effort(settings.eviction_effort)
            .build();
        if let Some(interval) = settings.cleanup_interval() {
            cache.start_janitor(interval);
        }

        Self {
            cache,
            provider,
            lookup_timeout: None,
        }
    }

    /// Bounds each provider call; `None` waits indefinitely.
    pub fn with_lookup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    // == Get ==
    /// Returns metadata for `pid`, from cache or from the provider.
    ///
    /// Failures are not cached; the next call for the pid asks again.
    pub async fn get(&self, pid: Pid) -> Result<Arc<ProcessMetadata>, LookupError> {
        let provider = Arc::clone(&self.provider);
        let timeout = self.lookup_timeout;
        self.cache
            .get_or_load(pid, move || {
                run_blocking(timeout, move || {
                    provider.get_process_metadata(pid).map(Arc::new)
                })
            })
            .await
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn stop_janitor(&self) {
        self.cache.stop_janitor();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Capabilities, Principal};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ProcessMetadataProvider for CountingProvider {
        fn get_process_metadata(&self, pid: Pid) -> Result<ProcessMetadata, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if pid == 0 {
                return Err(LookupError::ProcessNotFound(pid));
            }
            Ok(ProcessMetadata {
                pid,
                ppid: 1,
                name: format!("proc-{pid}"),
                title: String::new(),
                executable: String::new(),
                args: Vec::new(),
                env: BTreeMap::new(),
                start_time: Utc::now(),
                owner: Principal::default(),
                group: Principal::default(),
                capabilities: Capabilities::default(),
                entity_id: String::new(),
            })
        }
    }

    fn provider(delay: Duration) -> Arc<CountingProvider> {
        Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    #[tokio::test]
    async fn test_hit_after_first_lookup() {
        let provider = provider(Duration::ZERO);
        let cache = ProcessMetadataCache::new(provider.clone(), &CacheSettings::default());

        let first = cache.get(10).await.unwrap();
        let second = cache.get(10).await.unwrap();

        assert_eq!(first.name, "proc-10");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_single_provider_call() {
        let provider = provider(Duration::from_millis(100));
        let cache = Arc::new(ProcessMetadataCache::new(
            provider.clone(),
            &CacheSettings::default(),
        ));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let cache = cache.clone();
            tasks.spawn(async move { cache.get(77).await });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap().unwrap().pid, 77);
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_retried() {
        let provider = provider(Duration::ZERO);
        let cache = ProcessMetadataCache::new(provider.clone(), &CacheSettings::default());

        assert_eq!(cache.get(0).await, Err(LookupError::ProcessNotFound(0)));
        assert_eq!(cache.get(0).await, Err(LookupError::ProcessNotFound(0)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().load_failures, 2);
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let provider = provider(Duration::from_millis(300));
        let cache = ProcessMetadataCache::new(provider.clone(), &CacheSettings::default())
            .with_lookup_timeout(Some(Duration::from_millis(20)));

        assert_eq!(
            cache.get(5).await,
            Err(LookupError::TimedOut(Duration::from_millis(20)))
        );
        assert_eq!(cache.stats().total_entries, 0);
    }
}

//! Processor Module
//!
//! Builds enrichment processors from configuration and exposes them as one
//! type with two variants: plain, and owning a container id cache that must
//! be closed.

pub mod enrich;
pub mod mapping;

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::CacheStats;
use crate::config::ProcessorConfig;
use crate::container::{open_cgroup_reader, CgroupMatcher, CgroupReader, ContainerIdResolver};
use crate::error::{ConfigError, Result};
use crate::models::Event;
use crate::process::ProcessMetadataCache;

pub use enrich::EnrichmentProcessor;
pub use mapping::{EnrichmentMapping, CONTAINER_ID_FIELD};

static NEXT_INSTANCE_ID: AtomicU32 = AtomicU32::new(1);

// == Processor ==
/// A configured enrichment processor.
pub enum Processor {
    /// Holds no resources beyond the shared process cache
    Plain(EnrichmentProcessor),
    /// Owns a container id cache whose janitor runs until `close`
    Managed(ManagedProcessor),
}

impl Processor {
    pub fn builder(config: ProcessorConfig, processes: Arc<ProcessMetadataCache>) -> ProcessorBuilder {
        ProcessorBuilder {
            config,
            processes,
            cgroup_reader: None,
            mapping: None,
        }
    }

    pub fn inner(&self) -> &EnrichmentProcessor {
        match self {
            Processor::Plain(processor) => processor,
            Processor::Managed(managed) => &managed.inner,
        }
    }

    /// See [`EnrichmentProcessor::enrich`].
    pub async fn enrich<'a, E: Event>(&self, event: &'a E) -> Result<Cow<'a, E>> {
        self.inner().enrich(event).await
    }

    /// Releases owned resources. A no-op for the plain variant.
    pub fn close(&self) {
        if let Processor::Managed(managed) = self {
            managed.close();
        }
    }

    pub fn container_cache_stats(&self) -> Option<CacheStats> {
        self.inner().container_resolver().and_then(ContainerIdResolver::stats)
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner().fmt(f)
    }
}

// == Managed Processor ==
/// Processor owning a container id cache.
pub struct ManagedProcessor {
    inner: EnrichmentProcessor,
}

impl ManagedProcessor {
    /// Stops the container cache janitor; safe to call repeatedly.
    pub fn close(&self) {
        if let Some(resolver) = &self.inner.containers {
            resolver.close();
        }
    }
}

impl Drop for ManagedProcessor {
    fn drop(&mut self) {
        self.close();
    }
}

// == Builder ==
pub struct ProcessorBuilder {
    config: ProcessorConfig,
    processes: Arc<ProcessMetadataCache>,
    cgroup_reader: Option<Arc<dyn CgroupReader>>,
    mapping: Option<EnrichmentMapping>,
}

impl ProcessorBuilder {
    /// Uses `reader` instead of opening one under `host_path`.
    pub fn cgroup_reader(mut self, reader: Arc<dyn CgroupReader>) -> Self {
        self.cgroup_reader = Some(reader);
        self
    }

    /// Replaces the mapping derived from `include_fields` and `target`.
    pub fn mapping(mut self, mapping: EnrichmentMapping) -> Self {
        self.mapping = Some(mapping);
        self
    }

    /// Validates the configuration and assembles the processor.
    ///
    /// The container id resolver, and the cgroup reader behind it, are only
    /// created when the mapping reads `container.id`.
    pub fn build(self) -> std::result::Result<Processor, ConfigError> {
        let config = self.config;
        config.validate()?;

        let mapping = match self.mapping {
            Some(mapping) => mapping,
            None => EnrichmentMapping::from_config(&config)?,
        };
        let instance_id = NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed);
        if !config.overwrite_keys {
            let conflicting = mapping.pid_field_destinations(&config.match_pids);
            if !conflicting.is_empty() {
                warn!(
                    instance_id,
                    fields = ?conflicting,
                    "mapping writes to pid fields; events carrying them will fail with a field conflict unless target or overwrite_keys is set"
                );
            }
        }

        let containers = if mapping.requests_source(CONTAINER_ID_FIELD) {
            let matcher = CgroupMatcher::from_config(&config)?;
            let reader = self
                .cgroup_reader
                .unwrap_or_else(|| open_cgroup_reader(config.host_path.as_str()));
            let mut resolver = ContainerIdResolver::new(matcher, reader)
                .with_lookup_timeout(config.lookup_timeout());
            if let Some(settings) = config.cgroup_cache_settings() {
                resolver = resolver.with_cache(&settings, instance_id);
            }
            Some(resolver)
        } else {
            None
        };
        let managed = containers.as_ref().is_some_and(ContainerIdResolver::is_cached);

        let processor = EnrichmentProcessor {
            instance_id,
            match_pids: config
                .match_pids
                .into_iter()
                .filter(|field| !field.trim().is_empty())
                .collect(),
            overwrite_keys: config.overwrite_keys,
            ignore_missing: config.ignore_missing,
            mapping,
            processes: self.processes,
            containers,
        };
        info!(instance_id, %processor, "processor created");

        Ok(if managed {
            Processor::Managed(ManagedProcessor { inner: processor })
        } else {
            Processor::Plain(processor)
        })
    }
}

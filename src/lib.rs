//! Process Enricher - annotate events with process and container identity
//!
//! Bounded TTL caches in front of process metadata and cgroup lookups, and
//! the processor that merges their results into events.

pub mod cache;
pub mod config;
pub mod container;
pub mod error;
pub mod models;
pub mod process;
pub mod processor;
mod tasks;

pub use cache::{CacheStats, RemovalCause, TtlCache};
pub use config::{CacheSettings, ProcessorConfig};
pub use error::{ConfigError, EnrichError, LookupError};
pub use models::{Event, JsonEvent, Pid, ProcessMetadata};
pub use process::{ProcessMetadataCache, ProcessMetadataProvider, SysinfoProvider};
pub use processor::{EnrichmentMapping, Processor};

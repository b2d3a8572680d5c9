//! Enrichment Processor
//!
//! Per-event orchestration: pid extraction, the two lookups, and the
//! copy-on-write merge of metadata into the event.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::container::ContainerIdResolver;
use crate::error::{EnrichError, Result};
use crate::models::event::get_path;
use crate::models::{pid_from_value, Event, Pid};
use crate::process::ProcessMetadataCache;
use crate::processor::EnrichmentMapping;

// == Enrichment Processor ==
/// One configured enrichment step.
///
/// Shares the process metadata cache with every other processor and owns
/// its container id resolver, present only when the mapping asks for
/// `container.id`.
pub struct EnrichmentProcessor {
    pub(crate) instance_id: u32,
    pub(crate) match_pids: Vec<String>,
    pub(crate) overwrite_keys: bool,
    pub(crate) ignore_missing: bool,
    pub(crate) mapping: EnrichmentMapping,
    pub(crate) processes: Arc<ProcessMetadataCache>,
    pub(crate) containers: Option<ContainerIdResolver>,
}

impl EnrichmentProcessor {
    pub fn instance_id(&self) -> u32 {
        self.instance_id
    }

    pub fn mapping(&self) -> &EnrichmentMapping {
        &self.mapping
    }

    pub fn container_resolver(&self) -> Option<&ContainerIdResolver> {
        self.containers.as_ref()
    }

    // == Enrich ==
    /// Enriches `event`, returning it borrowed when nothing was written.
    ///
    /// On error the caller still holds the untouched original.
    pub async fn enrich<'a, E: Event>(&self, event: &'a E) -> Result<Cow<'a, E>> {
        let Some((field, raw_pid)) = self
            .match_pids
            .iter()
            .find_map(|field| event.get_value(field).map(|value| (field, value)))
        else {
            if self.ignore_missing {
                return Ok(Cow::Borrowed(event));
            }
            return Err(EnrichError::NoMatchingPidField(self.match_pids.clone()));
        };

        let pid = pid_from_value(raw_pid).map_err(|source| EnrichError::PidParse {
            field: field.clone(),
            source,
        })?;

        let metadata = self.composite_metadata(pid).await;
        if metadata.is_empty() {
            return Err(EnrichError::NoProcess(pid));
        }

        self.apply_mapping(event, &metadata)
    }

    /// Runs both lookups concurrently and merges whatever they produced.
    async fn composite_metadata(&self, pid: Pid) -> Map<String, Value> {
        let container_lookup = async {
            match &self.containers {
                Some(resolver) => resolver.resolve(pid).await,
                None => Ok(None),
            }
        };
        let (process, container) = tokio::join!(self.processes.get(pid), container_lookup);

        let mut metadata = match process {
            Ok(meta) => meta.to_fields(),
            Err(err) => {
                debug!(instance_id = self.instance_id, pid, error = %err, "failed to get process metadata");
                Map::new()
            }
        };

        match container {
            Ok(Some(id)) => {
                metadata.insert("container".to_string(), json!({ "id": id }));
            }
            Ok(None) => {}
            Err(err) => {
                debug!(instance_id = self.instance_id, pid, error = %err, "failed to get container id");
            }
        }

        metadata
    }

    /// Checks every destination before the first write, so a conflict
    /// leaves the event untouched.
    fn apply_mapping<'a, E: Event>(
        &self,
        event: &'a E,
        metadata: &Map<String, Value>,
    ) -> Result<Cow<'a, E>> {
        let mut writes = Vec::with_capacity(self.mapping.len());
        for (dest, source) in self.mapping.iter() {
            let Some(value) = get_path(metadata, source) else {
                continue;
            };
            if !self.overwrite_keys && event.get_value(dest).is_some() {
                return Err(EnrichError::FieldConflict {
                    field: dest.to_string(),
                });
            }
            writes.push((dest, value));
        }

        let mut result = Cow::Borrowed(event);
        for (dest, value) in writes {
            result.to_mut().put_value(dest, value.clone())?;
        }
        Ok(result)
    }
}

impl fmt::Display for EnrichmentProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mappings: Vec<String> = self
            .mapping
            .iter()
            .map(|(dest, source)| format!("{dest}:{source}"))
            .collect();
        write!(
            f,
            "add_process_metadata[{}]=[match_pids={:?}, mappings=[{}], ignore_missing={}, overwrite_keys={}, container_id={}]",
            self.instance_id,
            self.match_pids,
            mappings.join(", "),
            self.ignore_missing,
            self.overwrite_keys,
            self.containers.is_some(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheSettings;
    use crate::container::{CgroupMatcher, CgroupReader};
    use crate::error::LookupError;
    use crate::models::{Capabilities, JsonEvent, Principal, ProcessMetadata};
    use crate::process::ProcessMetadataProvider;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    struct StaticProvider;

    impl ProcessMetadataProvider for StaticProvider {
        fn get_process_metadata(&self, pid: Pid) -> std::result::Result<ProcessMetadata, LookupError> {
            if pid != 42 {
                return Err(LookupError::ProcessNotFound(pid));
            }
            Ok(ProcessMetadata {
                pid,
                ppid: 1,
                name: "bash".to_string(),
                title: "bash -l".to_string(),
                executable: "/bin/bash".to_string(),
                args: vec!["bash".to_string(), "-l".to_string()],
                env: BTreeMap::new(),
                start_time: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
                owner: Principal::default(),
                group: Principal::default(),
                capabilities: Capabilities::default(),
                entity_id: "e1".to_string(),
            })
        }
    }

    struct StaticReader;

    impl CgroupReader for StaticReader {
        fn process_cgroup_paths(&self, pid: Pid) -> std::result::Result<Vec<String>, LookupError> {
            match pid {
                42 | 7 => Ok(vec!["/docker/abc".to_string()]),
                _ => Err(LookupError::ProcessNotFound(pid)),
            }
        }
    }

    fn processor(mapping: EnrichmentMapping, with_containers: bool) -> EnrichmentProcessor {
        let processes = ProcessMetadataCache::new(Arc::new(StaticProvider), &CacheSettings::default());
        let containers = with_containers.then(|| {
            ContainerIdResolver::new(
                CgroupMatcher::Prefixes(vec!["/docker".to_string()]),
                Arc::new(StaticReader),
            )
        });
        EnrichmentProcessor {
            instance_id: 1,
            match_pids: vec!["pid".to_string(), "process.pid".to_string()],
            overwrite_keys: false,
            ignore_missing: false,
            mapping,
            processes: Arc::new(processes),
            containers,
        }
    }

    fn event(value: Value) -> JsonEvent {
        JsonEvent::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_first_present_pid_field_wins() {
        let p = processor(EnrichmentMapping::new([("proc.name", "process.name")]), false);
        let input = event(json!({"process": {"pid": 42}}));

        let out = p.enrich(&input).await.unwrap();
        assert_eq!(out.get_value("proc.name"), Some(&json!("bash")));
        assert!(matches!(out, Cow::Owned(_)));
    }

    #[tokio::test]
    async fn test_nothing_mapped_stays_borrowed() {
        let p = processor(EnrichmentMapping::new([("x", "process.missing")]), false);
        let input = event(json!({"pid": "42"}));

        let out = p.enrich(&input).await.unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[tokio::test]
    async fn test_container_only_metadata() {
        let p = processor(EnrichmentMapping::new([("container.id", "container.id")]), true);
        let input = event(json!({"pid": 7}));

        let out = p.enrich(&input).await.unwrap();
        assert_eq!(out.get_value("container.id"), Some(&json!("abc")));
    }

    #[tokio::test]
    async fn test_no_process_when_both_lookups_empty() {
        let p = processor(EnrichmentMapping::new([("container.id", "container.id")]), true);
        let input = event(json!({"pid": 9}));

        assert_eq!(p.enrich(&input).await.unwrap_err(), EnrichError::NoProcess(9));
    }

    #[tokio::test]
    async fn test_conflict_checks_all_destinations_first() {
        let p = processor(
            EnrichmentMapping::new([("a", "process.name"), ("b", "process.executable")]),
            false,
        );
        let input = event(json!({"pid": 42, "b": "taken"}));

        assert_eq!(
            p.enrich(&input).await.unwrap_err(),
            EnrichError::FieldConflict {
                field: "b".to_string()
            }
        );
        assert_eq!(input.get_value("a"), None);
    }

    #[tokio::test]
    async fn test_absent_source_skips_conflict_check() {
        let p = processor(EnrichmentMapping::new([("taken", "process.owner.name")]), false);
        let input = event(json!({"pid": 42, "taken": 1}));

        assert!(p.enrich(&input).await.is_ok());
    }

    #[tokio::test]
    async fn test_pid_parse_error_names_field() {
        let p = processor(EnrichmentMapping::default(), false);
        let input = event(json!({"pid": true}));

        assert!(matches!(
            p.enrich(&input).await,
            Err(EnrichError::PidParse { field, .. }) if field == "pid"
        ));
    }

    #[test]
    fn test_display_lists_mappings() {
        let p = processor(EnrichmentMapping::new([("a", "process.name")]), false);
        let shown = p.to_string();
        assert!(shown.starts_with("add_process_metadata[1]"));
        assert!(shown.contains("mappings=[a:process.name]"));
    }
}

//! Configuration Module
//!
//! Processor options and cache tuning knobs, loadable from environment
//! variables or deserialized from a JSON document.

use std::env;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::error::ConfigError;

/// Regex applied when neither `cgroup_prefixes` nor `cgroup_regex` is set.
pub const DEFAULT_CGROUP_REGEX: &str = r"^/.+/.+/.+/([0-9a-f]{64}).*";

// == Cache Settings ==
/// Tuning knobs for one bounded TTL cache.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Entry TTL in seconds
    pub ttl: u64,
    /// Maximum number of entries
    pub capacity: usize,
    /// Entries sampled per eviction decision
    pub eviction_effort: usize,
    /// Janitor interval in seconds; `None` leaves expiry to reads and eviction
    pub cleanup_interval: Option<u64>,
}

impl CacheSettings {
    /// Creates settings from environment variables, each name prefixed with `prefix`.
    ///
    /// # Environment Variables
    /// - `{prefix}CACHE_TTL` - Entry TTL in seconds (default: 30)
    /// - `{prefix}CACHE_CAPACITY` - Maximum entries (default: 32768)
    /// - `{prefix}CACHE_EVICTION_EFFORT` - Samples per eviction (default: 10)
    /// - `{prefix}CACHE_CLEANUP_INTERVAL` - Janitor interval in seconds (default: unset)
    pub fn from_env(prefix: &str) -> Self {
        let defaults = Self::default();
        Self {
            ttl: env_parse(&format!("{prefix}CACHE_TTL")).unwrap_or(defaults.ttl),
            capacity: env_parse(&format!("{prefix}CACHE_CAPACITY")).unwrap_or(defaults.capacity),
            eviction_effort: env_parse(&format!("{prefix}CACHE_EVICTION_EFFORT"))
                .unwrap_or(defaults.eviction_effort),
            cleanup_interval: env_parse(&format!("{prefix}CACHE_CLEANUP_INTERVAL"))
                .or(defaults.cleanup_interval),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    pub fn cleanup_interval(&self) -> Option<Duration> {
        self.cleanup_interval
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: 30,
            capacity: 32 << 10,
            eviction_effort: 10,
            cleanup_interval: None,
        }
    }
}

// == Processor Config ==
/// Options for one enrichment processor instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Candidate pid fields, tried in order
    pub match_pids: Vec<String>,
    /// Prefix prepended to every destination field
    pub target: String,
    /// Restricts the default mapping to these fields and their children
    pub include_fields: Vec<String>,
    pub overwrite_keys: bool,
    /// Pass events through untouched when no pid field matches
    pub ignore_missing: bool,
    /// Also map `process.env`
    pub restricted_fields: bool,
    /// Root of the host filesystem for `/proc` and `/etc` reads
    pub host_path: String,
    pub cgroup_prefixes: Vec<String>,
    pub cgroup_regex: Option<String>,
    /// Container-id cache TTL in seconds; 0 disables the cache
    pub cgroup_cache_expire_time: u64,
    /// Container-id cache capacity
    pub cgroup_cache_capacity: usize,
    /// Bound on a single provider or cgroup reader call, in ms; 0 disables it
    pub lookup_timeout_ms: u64,
}

impl ProcessorConfig {
    /// Creates a new ProcessorConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MATCH_PIDS` - Comma-separated pid fields (default: `process.pid`)
    /// - `TARGET` - Destination prefix (default: empty)
    /// - `INCLUDE_FIELDS` - Comma-separated field filter (default: all)
    /// - `OVERWRITE_KEYS` - Replace existing fields (default: false)
    /// - `IGNORE_MISSING` - Pass through events without pid fields (default: false)
    /// - `RESTRICTED_FIELDS` - Map process environment (default: false)
    /// - `HOST_PATH` - Host root filesystem (default: `/`)
    /// - `CGROUP_PREFIXES` - Comma-separated cgroup path prefixes
    /// - `CGROUP_REGEX` - Container id regex with one capture group
    /// - `CGROUP_CACHE_EXPIRE_TIME` - Container cache TTL in seconds (default: 30)
    /// - `CGROUP_CACHE_CAPACITY` - Container cache capacity (default: 4096)
    /// - `LOOKUP_TIMEOUT_MS` - Lookup timeout in milliseconds (default: 5000)
    ///
    /// With the defaults the mapping writes `process.pid` back onto the field
    /// it was read from, so every event for a live process fails with a field
    /// conflict. Set `TARGET` or `OVERWRITE_KEYS` for a usable setup.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            match_pids: env_list("MATCH_PIDS").unwrap_or(defaults.match_pids),
            target: env::var("TARGET").unwrap_or(defaults.target),
            include_fields: env_list("INCLUDE_FIELDS").unwrap_or(defaults.include_fields),
            overwrite_keys: env_parse("OVERWRITE_KEYS").unwrap_or(defaults.overwrite_keys),
            ignore_missing: env_parse("IGNORE_MISSING").unwrap_or(defaults.ignore_missing),
            restricted_fields: env_parse("RESTRICTED_FIELDS")
                .unwrap_or(defaults.restricted_fields),
            host_path: env::var("HOST_PATH").unwrap_or(defaults.host_path),
            cgroup_prefixes: env_list("CGROUP_PREFIXES").unwrap_or(defaults.cgroup_prefixes),
            cgroup_regex: env::var("CGROUP_REGEX").ok().or(defaults.cgroup_regex),
            cgroup_cache_expire_time: env_parse("CGROUP_CACHE_EXPIRE_TIME")
                .unwrap_or(defaults.cgroup_cache_expire_time),
            cgroup_cache_capacity: env_parse("CGROUP_CACHE_CAPACITY")
                .unwrap_or(defaults.cgroup_cache_capacity),
            lookup_timeout_ms: env_parse("LOOKUP_TIMEOUT_MS")
                .unwrap_or(defaults.lookup_timeout_ms),
        }
    }

    /// Checks the option combinations a processor cannot be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.match_pids.iter().all(|f| f.trim().is_empty()) {
            return Err(ConfigError::NoMatchPids);
        }
        if !self.cgroup_prefixes.is_empty() && self.cgroup_regex.is_some() {
            return Err(ConfigError::ConflictingCgroupRules);
        }
        if let Some(pattern) = &self.cgroup_regex {
            let regex = Regex::new(pattern)?;
            // captures_len counts the implicit whole-match group
            let groups = regex.captures_len() - 1;
            if groups != 1 {
                return Err(ConfigError::RegexCaptureGroups(groups));
            }
        }
        Ok(())
    }

    /// Settings for the container-id cache, `None` when it is disabled.
    ///
    /// The janitor runs once per TTL.
    pub fn cgroup_cache_settings(&self) -> Option<CacheSettings> {
        (self.cgroup_cache_expire_time > 0).then(|| CacheSettings {
            ttl: self.cgroup_cache_expire_time,
            capacity: self.cgroup_cache_capacity,
            cleanup_interval: Some(self.cgroup_cache_expire_time),
            ..CacheSettings::default()
        })
    }

    pub fn lookup_timeout(&self) -> Option<Duration> {
        (self.lookup_timeout_ms > 0).then(|| Duration::from_millis(self.lookup_timeout_ms))
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            match_pids: vec!["process.pid".to_string()],
            target: String::new(),
            include_fields: Vec::new(),
            overwrite_keys: false,
            ignore_missing: false,
            restricted_fields: false,
            host_path: "/".to_string(),
            cgroup_prefixes: Vec::new(),
            cgroup_regex: None,
            cgroup_cache_expire_time: 30,
            cgroup_cache_capacity: 4096,
            lookup_timeout_ms: 5_000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_list(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}

//! Cgroup Matching Rules
//!
//! Extracts a container id from a process's cgroup paths.

use regex::Regex;

use crate::config::{ProcessorConfig, DEFAULT_CGROUP_REGEX};
use crate::error::ConfigError;

// == Cgroup Matcher ==
/// Rule for deriving a container id from cgroup paths.
#[derive(Debug, Clone)]
pub enum CgroupMatcher {
    /// The first path under one of these prefixes yields its last component
    Prefixes(Vec<String>),
    /// The first path matching yields capture group 1
    Regex(Regex),
}

impl CgroupMatcher {
    /// Builds the configured rule, falling back to the default regex.
    pub fn from_config(config: &ProcessorConfig) -> Result<Self, ConfigError> {
        match (&config.cgroup_prefixes[..], &config.cgroup_regex) {
            ([], None) => Ok(CgroupMatcher::Regex(Regex::new(DEFAULT_CGROUP_REGEX)?)),
            ([], Some(pattern)) => Ok(CgroupMatcher::Regex(Regex::new(pattern)?)),
            (prefixes, None) => Ok(CgroupMatcher::Prefixes(prefixes.to_vec())),
            (_, Some(_)) => Err(ConfigError::ConflictingCgroupRules),
        }
    }

    /// Returns the container id found in the first matching path.
    pub fn container_id(&self, paths: &[String]) -> Option<String> {
        paths.iter().find_map(|path| self.match_path(path))
    }

    fn match_path(&self, path: &str) -> Option<String> {
        match self {
            CgroupMatcher::Prefixes(prefixes) => {
                if !prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())) {
                    return None;
                }
                path.trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .filter(|id| !id.is_empty())
                    .map(String::from)
            }
            CgroupMatcher::Regex(regex) => regex
                .captures(path)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
                .filter(|id| !id.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CID: &str = "8a1e3d3c2f0b4e5a9c7d6b5a4f3e2d1c0b9a8f7e6d5c4b3a2f1e0d9c8b7a6f5e";

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_regex_matches_kubepods_path() {
        let matcher = CgroupMatcher::from_config(&ProcessorConfig::default()).unwrap();
        let path = format!("/kubepods/besteffort/pod1234/{CID}");

        assert_eq!(matcher.container_id(&paths(&[&path])), Some(CID.to_string()));
    }

    #[test]
    fn test_default_regex_ignores_shallow_paths() {
        let matcher = CgroupMatcher::from_config(&ProcessorConfig::default()).unwrap();
        let path = format!("/docker/{CID}");

        assert_eq!(matcher.container_id(&paths(&[&path, "/user.slice"])), None);
    }

    #[test]
    fn test_prefixes_take_last_component() {
        let config = ProcessorConfig {
            cgroup_prefixes: vec!["/docker".to_string(), "/kubepods".to_string()],
            ..Default::default()
        };
        let matcher = CgroupMatcher::from_config(&config).unwrap();

        assert_eq!(
            matcher.container_id(&paths(&["/user.slice", "/docker/abc123"])),
            Some("abc123".to_string())
        );
        assert_eq!(matcher.container_id(&paths(&["/system.slice/cron"])), None);
    }

    #[test]
    fn test_custom_regex_first_group() {
        let config = ProcessorConfig {
            cgroup_regex: Some(r"docker-([0-9a-f]+)\.scope$".to_string()),
            ..Default::default()
        };
        let matcher = CgroupMatcher::from_config(&config).unwrap();

        assert_eq!(
            matcher.container_id(&paths(&["/system.slice/docker-beef.scope"])),
            Some("beef".to_string())
        );
    }

    #[test]
    fn test_conflicting_rules_rejected() {
        let config = ProcessorConfig {
            cgroup_prefixes: vec!["/docker".to_string()],
            cgroup_regex: Some("(x)".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            CgroupMatcher::from_config(&config),
            Err(ConfigError::ConflictingCgroupRules)
        ));
    }
}

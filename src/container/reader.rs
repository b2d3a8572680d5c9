//! Cgroup Readers
//!
//! The capability that lists a process's cgroup paths, and its procfs and
//! no-op implementations.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::error::LookupError;
use crate::models::Pid;

// == Reader Capability ==
/// Source of cgroup membership for a process.
pub trait CgroupReader: Send + Sync {
    /// Returns the distinct cgroup paths of `pid` across all hierarchies.
    fn process_cgroup_paths(&self, pid: Pid) -> Result<Vec<String>, LookupError>;
}

// == Procfs Reader ==
/// Reads `<host_path>/proc/<pid>/cgroup`, covering cgroup v1 and v2 lines.
#[derive(Debug, Clone)]
pub struct ProcCgroupReader {
    host_path: PathBuf,
}

impl ProcCgroupReader {
    /// Fails with `CgroupsUnavailable` when the host has no cgroup mount.
    pub fn new(host_path: impl Into<PathBuf>) -> Result<Self, LookupError> {
        let host_path = host_path.into();
        if !host_path.join("sys/fs/cgroup").is_dir() {
            return Err(LookupError::CgroupsUnavailable);
        }
        Ok(Self { host_path })
    }
}

impl CgroupReader for ProcCgroupReader {
    fn process_cgroup_paths(&self, pid: Pid) -> Result<Vec<String>, LookupError> {
        let path = self.host_path.join(format!("proc/{pid}/cgroup"));
        let contents = fs::read_to_string(&path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => LookupError::ProcessNotFound(pid),
            _ => LookupError::from(err),
        })?;
        Ok(parse_cgroup_file(&contents))
    }
}

/// Extracts the path column of each `hierarchy-id:controllers:path` line.
pub fn parse_cgroup_file(contents: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for line in contents.lines() {
        let Some(path) = line.splitn(3, ':').nth(2) else {
            continue;
        };
        if !path.is_empty() && !paths.iter().any(|p| p == path) {
            paths.push(path.to_string());
        }
    }
    paths
}

// == No-op Reader ==
/// Stand-in used when the host has no cgroups: every process has none.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCgroupReader;

impl CgroupReader for NoopCgroupReader {
    fn process_cgroup_paths(&self, _pid: Pid) -> Result<Vec<String>, LookupError> {
        Ok(Vec::new())
    }
}

/// Opens the procfs reader, degrading to [`NoopCgroupReader`] without cgroups.
pub fn open_cgroup_reader(host_path: impl Into<PathBuf>) -> Arc<dyn CgroupReader> {
    let host_path = host_path.into();
    match ProcCgroupReader::new(&host_path) {
        Ok(reader) => Arc::new(reader),
        Err(err) => {
            warn!(host_path = %host_path.display(), error = %err, "container ids will not be resolved");
            Arc::new(NoopCgroupReader)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CGROUP_V1: &str = "12:memory:/docker/aaaa\n11:cpu,cpuacct:/docker/aaaa\n1:name=systemd:/docker/aaaa\n";
    const CGROUP_V2: &str = "0::/system.slice/docker-bbbb.scope\n";

    #[test]
    fn test_parse_v1_dedups_paths() {
        assert_eq!(parse_cgroup_file(CGROUP_V1), vec!["/docker/aaaa".to_string()]);
    }

    #[test]
    fn test_parse_v2() {
        assert_eq!(
            parse_cgroup_file(CGROUP_V2),
            vec!["/system.slice/docker-bbbb.scope".to_string()]
        );
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        assert!(parse_cgroup_file("garbage\n\n3:cpu:\n").is_empty());
    }

    #[test]
    fn test_reader_requires_cgroup_mount() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(
            ProcCgroupReader::new(root.path()).unwrap_err(),
            LookupError::CgroupsUnavailable
        );
    }

    #[test]
    fn test_reader_reads_fake_proc() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("sys/fs/cgroup")).unwrap();
        fs::create_dir_all(root.path().join("proc/42")).unwrap();
        fs::write(root.path().join("proc/42/cgroup"), CGROUP_V2).unwrap();

        let reader = ProcCgroupReader::new(root.path()).unwrap();
        assert_eq!(
            reader.process_cgroup_paths(42).unwrap(),
            vec!["/system.slice/docker-bbbb.scope".to_string()]
        );
        assert_eq!(
            reader.process_cgroup_paths(43),
            Err(LookupError::ProcessNotFound(43))
        );
    }

    #[test]
    fn test_open_degrades_to_noop() {
        let root = tempfile::tempdir().unwrap();
        let reader = open_cgroup_reader(root.path());
        assert_eq!(reader.process_cgroup_paths(1), Ok(Vec::new()));
    }
}

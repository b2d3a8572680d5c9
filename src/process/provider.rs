//! Process Metadata Providers
//!
//! The provider capability and its production implementation backed by
//! sysinfo and procfs.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use sysinfo::{Pid as SysPid, ProcessRefreshKind, System};
use tracing::debug;

use crate::error::LookupError;
use crate::models::{Pid, Principal, ProcessMetadata};
use crate::process::capabilities::{parse_status, ProcStatus};

// == Provider Capability ==
/// Source of process metadata.
///
/// Implementations may block; callers run them on the blocking pool.
pub trait ProcessMetadataProvider: Send + Sync {
    /// Returns metadata for `pid`, or `LookupError::ProcessNotFound` when no
    /// such process is running.
    fn get_process_metadata(&self, pid: Pid) -> Result<ProcessMetadata, LookupError>;
}

// == Sysinfo Provider ==
/// Reads process metadata from the local process table.
///
/// Names, arguments, environment and timing come from sysinfo; uid, gid and
/// capabilities from `<host_path>/proc/<pid>/status`; user and group names
/// from `<host_path>/etc/passwd` and `<host_path>/etc/group`.
pub struct SysinfoProvider {
    system: Mutex<System>,
    host_path: PathBuf,
    host_id: Option<String>,
}

impl SysinfoProvider {
    pub fn new(host_path: impl Into<PathBuf>) -> Self {
        let host_path = host_path.into();
        let host_id = fs::read_to_string(host_path.join("etc/machine-id"))
            .ok()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        if host_id.is_none() {
            debug!(host_path = %host_path.display(), "no machine-id found, entity ids use pid and start time only");
        }

        Self {
            system: Mutex::new(System::new()),
            host_path,
            host_id,
        }
    }

    fn read_status(&self, pid: Pid) -> ProcStatus {
        let path = self.host_path.join(format!("proc/{pid}/status"));
        match fs::read_to_string(&path) {
            Ok(contents) => parse_status(&contents),
            Err(err) => {
                debug!(pid, error = %err, "cannot read process status");
                ProcStatus::default()
            }
        }
    }
}

impl ProcessMetadataProvider for SysinfoProvider {
    fn get_process_metadata(&self, pid: Pid) -> Result<ProcessMetadata, LookupError> {
        let sys_pid = u32::try_from(pid)
            .map(SysPid::from_u32)
            .map_err(|_| LookupError::ProcessNotFound(pid))?;

        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        if !system.refresh_process_specifics(sys_pid, ProcessRefreshKind::everything()) {
            return Err(LookupError::ProcessNotFound(pid));
        }
        let process = system
            .process(sys_pid)
            .ok_or(LookupError::ProcessNotFound(pid))?;

        let args: Vec<String> = process.cmd().to_vec();
        let env: BTreeMap<String, String> = process
            .environ()
            .iter()
            .filter_map(|var| var.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let start_time = DateTime::<Utc>::from_timestamp(process.start_time() as i64, 0)
            .unwrap_or_default();

        let mut meta = ProcessMetadata {
            pid,
            ppid: process
                .parent()
                .and_then(|p| Pid::try_from(p.as_u32()).ok())
                .unwrap_or(0),
            name: process.name().to_string(),
            title: args.join(" "),
            executable: process
                .exe()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            args,
            env,
            start_time,
            owner: Principal::default(),
            group: Principal::default(),
            capabilities: Default::default(),
            entity_id: String::new(),
        };
        drop(system);

        let status = self.read_status(pid);
        meta.owner = principal(status.uid, &self.host_path.join("etc/passwd"));
        meta.group = principal(status.gid, &self.host_path.join("etc/group"));
        meta.capabilities = status.capabilities;
        meta.entity_id = entity_id(self.host_id.as_deref(), pid, &meta.start_time);

        Ok(meta)
    }
}

fn principal(id: Option<String>, database: &Path) -> Principal {
    let name = id
        .as_deref()
        .and_then(|id| lookup_name(database, id).ok().flatten());
    Principal { name, id }
}

/// Finds the name for numeric `id` in a passwd- or group-format file.
fn lookup_name(database: &Path, id: &str) -> io::Result<Option<String>> {
    let contents = fs::read_to_string(database)?;
    Ok(contents.lines().find_map(|line| {
        let mut fields = line.split(':');
        let name = fields.next()?;
        let _password = fields.next()?;
        (fields.next()? == id).then(|| name.to_string())
    }))
}

/// Hashes host identity, pid and start time into a stable process instance id.
pub fn entity_id(host_id: Option<&str>, pid: Pid, start_time: &DateTime<Utc>) -> String {
    let mut hasher = blake3::Hasher::new();
    if let Some(host_id) = host_id {
        hasher.update(host_id.as_bytes());
    }
    hasher.update(&pid.to_le_bytes());
    hasher.update(&start_time.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.finalize().to_hex()[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_entity_id_is_stable_and_distinct() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 1).unwrap();

        let id = entity_id(Some("host"), 10, &start);
        assert_eq!(id.len(), 32);
        assert_eq!(id, entity_id(Some("host"), 10, &start));
        assert_ne!(id, entity_id(Some("host"), 11, &start));
        assert_ne!(id, entity_id(Some("host"), 10, &later));
        assert_ne!(id, entity_id(Some("other"), 10, &start));
    }

    #[test]
    fn test_lookup_name_in_passwd() {
        let dir = tempfile::tempdir().unwrap();
        let passwd = dir.path().join("passwd");
        fs::write(
            &passwd,
            "root:x:0:0:root:/root:/bin/bash\nalice:x:1000:1000::/home/alice:/bin/sh\n",
        )
        .unwrap();

        assert_eq!(lookup_name(&passwd, "1000").unwrap(), Some("alice".to_string()));
        assert_eq!(lookup_name(&passwd, "0").unwrap(), Some("root".to_string()));
        assert_eq!(lookup_name(&passwd, "42").unwrap(), None);
    }

    #[test]
    fn test_principal_without_database_keeps_id() {
        let principal = principal(Some("7".to_string()), Path::new("/nonexistent/passwd"));
        assert_eq!(principal.id.as_deref(), Some("7"));
        assert_eq!(principal.name, None);
    }

    #[test]
    fn test_negative_pid_not_found() {
        let provider = SysinfoProvider::new("/");
        assert_eq!(
            provider.get_process_metadata(-5),
            Err(LookupError::ProcessNotFound(-5))
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_reads_own_process() {
        let provider = SysinfoProvider::new("/");
        let pid = std::process::id() as Pid;
        let meta = provider.get_process_metadata(pid).unwrap();

        assert_eq!(meta.pid, pid);
        assert!(!meta.name.is_empty());
        assert!(meta.owner.id.is_some());
        assert_eq!(meta.entity_id.len(), 32);
    }
}

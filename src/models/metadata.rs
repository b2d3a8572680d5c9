//! Process Metadata Model
//!
//! Immutable description of a process as reported by a metadata provider.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::models::Pid;

/// Name and id of a user or group; either may be unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub name: Option<String>,
    pub id: Option<String>,
}

impl Principal {
    fn to_value(&self) -> Option<Value> {
        if self.name.is_none() && self.id.is_none() {
            return None;
        }
        let mut map = Map::new();
        if let Some(name) = &self.name {
            map.insert("name".to_string(), json!(name));
        }
        if let Some(id) = &self.id {
            map.insert("id".to_string(), json!(id));
        }
        Some(Value::Object(map))
    }
}

/// Effective and permitted capability names (`CAP_*`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub effective: Vec<String>,
    pub permitted: Vec<String>,
}

// == Process Metadata ==
/// Metadata for one process instance.
///
/// Produced once by a provider and shared read-only through the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessMetadata {
    pub pid: Pid,
    pub ppid: Pid,
    pub name: String,
    pub title: String,
    pub executable: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub start_time: DateTime<Utc>,
    pub owner: Principal,
    pub group: Principal,
    pub capabilities: Capabilities,
    /// Identifier unique to this process instance across pid reuse
    pub entity_id: String,
}

impl ProcessMetadata {
    /// Renders the metadata as the `process` section of the composite map.
    ///
    /// Owner and group appear only when a name or id is known, capability
    /// lists only when non-empty.
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut process = Map::new();
        process.insert("entity_id".to_string(), json!(self.entity_id));
        process.insert("name".to_string(), json!(self.name));
        process.insert("title".to_string(), json!(self.title));
        process.insert("executable".to_string(), json!(self.executable));
        process.insert("args".to_string(), json!(self.args));
        process.insert("env".to_string(), json!(self.env));
        process.insert("pid".to_string(), json!(self.pid));
        process.insert("parent".to_string(), json!({ "pid": self.ppid }));
        process.insert("start_time".to_string(), json!(self.start_time));

        if let Some(owner) = self.owner.to_value() {
            process.insert("owner".to_string(), owner);
        }
        if let Some(group) = self.group.to_value() {
            process.insert("group".to_string(), group);
        }

        let mut caps = Map::new();
        if !self.capabilities.effective.is_empty() {
            caps.insert("effective".to_string(), json!(self.capabilities.effective));
        }
        if !self.capabilities.permitted.is_empty() {
            caps.insert("permitted".to_string(), json!(self.capabilities.permitted));
        }
        if !caps.is_empty() {
            process.insert("thread".to_string(), json!({ "capabilities": caps }));
        }

        let mut fields = Map::new();
        fields.insert("process".to_string(), Value::Object(process));
        fields
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::get_path;
    use chrono::TimeZone;

    fn sample() -> ProcessMetadata {
        ProcessMetadata {
            pid: 42,
            ppid: 1,
            name: "bash".to_string(),
            title: "/bin/bash -l".to_string(),
            executable: "/bin/bash".to_string(),
            args: vec!["/bin/bash".to_string(), "-l".to_string()],
            env: BTreeMap::from([("HOME".to_string(), "/root".to_string())]),
            start_time: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            owner: Principal::default(),
            group: Principal::default(),
            capabilities: Capabilities::default(),
            entity_id: "abc".to_string(),
        }
    }

    #[test]
    fn test_fields_layout() {
        let fields = sample().to_fields();

        assert_eq!(get_path(&fields, "process.name"), Some(&json!("bash")));
        assert_eq!(get_path(&fields, "process.parent.pid"), Some(&json!(1)));
        assert_eq!(get_path(&fields, "process.env.HOME"), Some(&json!("/root")));
        assert_eq!(
            get_path(&fields, "process.start_time"),
            Some(&json!("2024-01-02T03:04:05Z"))
        );
    }

    #[test]
    fn test_optional_sections_omitted() {
        let fields = sample().to_fields();

        assert_eq!(get_path(&fields, "process.owner"), None);
        assert_eq!(get_path(&fields, "process.group"), None);
        assert_eq!(get_path(&fields, "process.thread"), None);
    }

    #[test]
    fn test_optional_sections_present() {
        let mut meta = sample();
        meta.owner.name = Some("root".to_string());
        meta.group.id = Some("0".to_string());
        meta.capabilities.effective = vec!["CAP_CHOWN".to_string()];

        let fields = meta.to_fields();
        assert_eq!(get_path(&fields, "process.owner"), Some(&json!({"name": "root"})));
        assert_eq!(get_path(&fields, "process.group"), Some(&json!({"id": "0"})));
        assert_eq!(
            get_path(&fields, "process.thread.capabilities.effective"),
            Some(&json!(["CAP_CHOWN"]))
        );
        assert_eq!(get_path(&fields, "process.thread.capabilities.permitted"), None);
    }
}

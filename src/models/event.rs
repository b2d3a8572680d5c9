//! Event Model
//!
//! The minimal event capability the enrichment processor works against,
//! plus a JSON-object backed implementation used by the binary and tests.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EventError;

// == Event Capability ==
/// An opaque, mutable record addressed by dotted field paths.
///
/// `Clone` provides the copy taken before the first enrichment write.
pub trait Event: Clone {
    /// Returns the value at `path`, or `None` when any segment is missing.
    fn get_value(&self, path: &str) -> Option<&Value>;

    /// Writes `value` at `path`, creating intermediate objects as needed.
    ///
    /// Returns the value previously stored at `path`, if any.
    fn put_value(&mut self, path: &str, value: Value) -> Result<Option<Value>, EventError>;
}

// == JSON Event ==
/// Event backed by a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonEvent {
    fields: Map<String, Value>,
}

impl JsonEvent {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Builds an event from a JSON value; non-objects are rejected.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl Event for JsonEvent {
    fn get_value(&self, path: &str) -> Option<&Value> {
        get_path(&self.fields, path)
    }

    fn put_value(&mut self, path: &str, value: Value) -> Result<Option<Value>, EventError> {
        put_path(&mut self.fields, path, value)
    }
}

// == Path Helpers ==
/// Resolves a dotted path inside a JSON object.
pub fn get_path<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = map.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Stores a value at a dotted path, creating intermediate objects.
pub fn put_path(
    map: &mut Map<String, Value>,
    path: &str,
    value: Value,
) -> Result<Option<Value>, EventError> {
    if path.is_empty() {
        return Err(EventError::EmptyPath);
    }

    let (parents, leaf) = match path.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, path),
    };

    let mut current = map;
    if let Some(parents) = parents {
        let mut walked = String::new();
        for segment in parents.split('.') {
            if !walked.is_empty() {
                walked.push('.');
            }
            walked.push_str(segment);

            let slot = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = match slot {
                Value::Object(inner) => inner,
                _ => return Err(EventError::NotAnObject(walked)),
            };
        }
    }

    Ok(current.insert(leaf.to_string(), value))
}

//! Error types for the enrichment pipeline
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

use crate::models::Pid;

// == Lookup Error ==
/// Failure of a single provider or cgroup reader call.
///
/// This is the only error a cache loader may return. It is cloned to every
/// caller waiting on the same in-flight computation, so it carries owned
/// strings instead of source errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The pid does not correspond to a running process
    #[error("process not found: {0}")]
    ProcessNotFound(Pid),

    /// The host has no cgroup support
    #[error("cgroups are not available on this host")]
    CgroupsUnavailable,

    /// Provider reported a failure
    #[error("provider error: {0}")]
    Provider(String),

    /// Reading process or cgroup files failed
    #[error("io error: {0}")]
    Io(String),

    /// The lookup did not complete in time
    #[error("lookup timed out after {0:?}")]
    TimedOut(Duration),

    /// The blocking lookup task panicked or was cancelled
    #[error("lookup task failed: {0}")]
    TaskFailed(String),
}

impl From<std::io::Error> for LookupError {
    fn from(err: std::io::Error) -> Self {
        LookupError::Io(err.to_string())
    }
}

// == Pid Parse Error ==
/// The matched pid field could not be coerced into a pid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PidParseError {
    #[error("error converting string to integer: {0:?}")]
    InvalidString(String),

    #[error("integer out of range: {0}")]
    OutOfRange(String),

    #[error("not an integer or string, but {0}")]
    UnsupportedType(&'static str),
}

// == Event Error ==
/// Failure writing into an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("empty field path")]
    EmptyPath,

    /// An intermediate path segment holds a non-object value
    #[error("cannot write below non-object value at '{0}'")]
    NotAnObject(String),
}

// == Enrich Error ==
/// Hard errors returned by a single enrichment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnrichError {
    /// None of the configured pid fields is present in the event
    #[error("none of the fields in match_pids found in the event: {0:?}")]
    NoMatchingPidField(Vec<String>),

    #[error("cannot parse pid field '{field}': {source}")]
    PidParse {
        field: String,
        #[source]
        source: PidParseError,
    },

    /// Neither process metadata nor a container id could be resolved
    #[error("process not found: {0}")]
    NoProcess(Pid),

    #[error("target field '{field}' already exists and overwrite_keys is false")]
    FieldConflict { field: String },

    #[error("failed to write enriched field: {0}")]
    Event(#[from] EventError),
}

// == Config Error ==
/// Invalid processor configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("match_pids must contain at least one field")]
    NoMatchPids,

    #[error("cgroup_prefixes and cgroup_regex are mutually exclusive")]
    ConflictingCgroupRules,

    #[error("invalid cgroup_regex: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("cgroup_regex must contain exactly one capturing group, found {0}")]
    RegexCaptureGroups(usize),

    #[error("include_fields entry '{0}' does not name a known field")]
    InvalidIncludeField(String),
}

// == Result Type Alias ==
/// Convenience Result type for enrichment.
pub type Result<T> = std::result::Result<T, EnrichError>;

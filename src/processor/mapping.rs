//! Enrichment Mapping
//!
//! The ordered destination-to-source field table applied to each event.

use crate::config::ProcessorConfig;
use crate::error::ConfigError;

/// Composite metadata path holding the resolved container id.
pub const CONTAINER_ID_FIELD: &str = "container.id";

const DEFAULT_FIELDS: &[&str] = &[
    "process.name",
    "process.title",
    "process.executable",
    "process.args",
    "process.pid",
    "process.parent.pid",
    "process.start_time",
    "process.entity_id",
    "process.owner.name",
    "process.owner.id",
    "process.group.name",
    "process.group.id",
    "process.thread.capabilities.effective",
    "process.thread.capabilities.permitted",
    CONTAINER_ID_FIELD,
];

/// Fields that may leak secrets; mapped only with `restricted_fields`.
const RESTRICTED_FIELDS: &[&str] = &["process.env"];

// == Enrichment Mapping ==
/// Ordered list of `(destination, source)` field paths.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnrichmentMapping {
    entries: Vec<(String, String)>,
}

impl EnrichmentMapping {
    pub fn new<D, S>(entries: impl IntoIterator<Item = (D, S)>) -> Self
    where
        D: Into<String>,
        S: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(dest, source)| (dest.into(), source.into()))
                .collect(),
        }
    }

    /// Builds the default mapping, filtered by `include_fields` and
    /// prefixed by `target`.
    ///
    /// An include entry selects the named field and everything below it.
    pub fn from_config(config: &ProcessorConfig) -> Result<Self, ConfigError> {
        let available: Vec<&str> = if config.restricted_fields {
            DEFAULT_FIELDS.iter().chain(RESTRICTED_FIELDS).copied().collect()
        } else {
            DEFAULT_FIELDS.to_vec()
        };

        let selected: Vec<&str> = if config.include_fields.is_empty() {
            available
        } else {
            for include in &config.include_fields {
                if !available.iter().any(|field| covers(include, field)) {
                    return Err(ConfigError::InvalidIncludeField(include.clone()));
                }
            }
            available
                .into_iter()
                .filter(|field| config.include_fields.iter().any(|inc| covers(inc, field)))
                .collect()
        };

        let target = config.target.trim_end_matches('.');
        Ok(Self::new(selected.into_iter().map(|field| {
            let dest = if target.is_empty() {
                field.to_string()
            } else {
                format!("{target}.{field}")
            };
            (dest, field)
        })))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(dest, source)| (dest.as_str(), source.as_str()))
    }

    /// Whether any entry reads from `source`.
    pub fn requests_source(&self, source: &str) -> bool {
        self.entries.iter().any(|(_, s)| s == source)
    }

    /// Destinations that are also pid fields in `match_pids`.
    ///
    /// Events carrying such a field conflict on it unless keys are
    /// overwritten, since the mapping writes the resolved value back.
    pub fn pid_field_destinations<'a>(&'a self, match_pids: &'a [String]) -> Vec<&'a str> {
        self.entries
            .iter()
            .map(|(dest, _)| dest.as_str())
            .filter(|dest| match_pids.iter().any(|field| field == dest))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn covers(include: &str, field: &str) -> bool {
    field == include
        || field
            .strip_prefix(include)
            .is_some_and(|rest| rest.starts_with('.'))
}

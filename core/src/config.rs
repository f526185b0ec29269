use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};
use unitary_proto::CollectionId;

use crate::{dispatch::DispatchConfig, error::ConfigError, policy::Grant, unit_of_work::FlushMode};

pub const DEFAULT_ERROR_LOG_COLLECTION: &str = "error_log";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorLogConfig {
    /// Collection that durable error log entries are written to
    pub collection: CollectionId,
}

impl Default for ErrorLogConfig {
    fn default() -> Self { Self { collection: CollectionId::fixed_name(DEFAULT_ERROR_LOG_COLLECTION) } }
}

/// Runtime configuration, resolved once and handed to the runtime at construction.
///
/// ```json
/// {
///   "flush_mode": "per_type",
///   "type_order": ["account", "contact"],
///   "dispatch": { "enabled": true, "bypass": ["audit"] },
///   "error_log": { "collection": "error_log" },
///   "grants": { "clerk": [{ "collection": "invoice", "operations": ["insert", "update"] }] }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub flush_mode: FlushMode,
    pub type_order: Vec<CollectionId>,
    pub dispatch: DispatchConfig,
    pub error_log: ErrorLogConfig,
    pub grants: BTreeMap<String, Vec<Grant>>,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> { Ok(serde_json::from_str(json)?) }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

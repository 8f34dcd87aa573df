//! Per-operation and per-transaction options.
//!
//! The engine does not interpret these; it carries them from the workload
//! file to the backend client, which maps them onto its driver's options.

use crate::duration::DurationSpec;
use serde::Deserialize;

/// Write acknowledgment requirement: a node count or a named mode such as
/// `majority`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WriteConcernLevel {
    Nodes(u32),
    Named(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriteConcern {
    #[serde(default)]
    pub level: Option<WriteConcernLevel>,
    #[serde(default)]
    pub journal: Option<bool>,
    #[serde(default)]
    pub timeout: Option<DurationSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReadConcern {
    pub level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadMode {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReadPreference {
    #[serde(default)]
    pub read_mode: ReadMode,
    #[serde(default)]
    pub max_staleness_seconds: Option<u64>,
}

/// `Options` block of an operation command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OperationOptions {
    /// Stop a multi-document write at the first failure (default true)
    #[serde(default)]
    pub ordered: Option<bool>,
    #[serde(default)]
    pub write_concern: Option<WriteConcern>,
    #[serde(default)]
    pub read_concern: Option<ReadConcern>,
    #[serde(default)]
    pub read_preference: Option<ReadPreference>,
}

impl OperationOptions {
    pub fn is_ordered(&self) -> bool {
        self.ordered.unwrap_or(true)
    }
}

/// Options for `startTransaction`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactionOptions {
    #[serde(default)]
    pub write_concern: Option<WriteConcern>,
    #[serde(default)]
    pub read_concern: Option<ReadConcern>,
    #[serde(default)]
    pub read_preference: Option<ReadPreference>,
}

impl From<&OperationOptions> for TransactionOptions {
    fn from(options: &OperationOptions) -> Self {
        Self {
            write_concern: options.write_concern.clone(),
            read_concern: options.read_concern.clone(),
            read_preference: options.read_preference.clone(),
        }
    }
}

//! Workload configuration loaded from YAML.
//!
//! A workload file lists actors; each actor lists phases. Phase settings are
//! looked up with fallback, so a key missing from a phase is read from the
//! enclosing actor and then from the workload's top level:
//!
//! ```yaml
//! Database: test
//! Actors:
//! - Name: Updater
//!   Type: MultiCollectionUpdate
//!   Threads: 2
//!   CollectionCount: 5
//!   Phases:
//!   - Repeat: 100
//!     UpdateFilter: { a: 1 }
//!     Update: { $set: { a: 5 } }
//!     MinDelay: 10 milliseconds
//! ```

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_yaml::Value as YamlValue;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Default workload seed when the file does not specify one.
pub const DEFAULT_SEED: u64 = 269_849_313_357_703_264;

/// Error type for configuration loading and lookups.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Error reading the workload file
    #[error("Failed to read workload file: {0}")]
    IoError(#[from] std::io::Error),

    /// Error parsing YAML
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// A required key is absent at every lookup level
    #[error("{scope}: missing required field '{field}'")]
    MissingField { scope: String, field: String },

    /// A key is present but has the wrong shape
    #[error("{scope}: invalid value for '{field}': {message}")]
    InvalidField {
        scope: String,
        field: String,
        message: String,
    },

    /// Malformed duration string
    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    /// Actor type not present in the actor registry
    #[error("Unknown actor type '{actor_type}' for actor '{actor}'")]
    UnknownActorType { actor: String, actor_type: String },

    /// Operation name not present in the operation registry
    #[error("{scope}: unknown operation '{name}'")]
    UnknownOperation { scope: String, name: String },

    /// Malformed value template
    #[error("{scope}: invalid template for '{field}': {message}")]
    InvalidTemplate {
        scope: String,
        field: String,
        message: String,
    },

    /// Anything else that makes the workload unusable
    #[error("{0}")]
    Invalid(String),
}

/// Top-level workload description.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkloadConfig {
    /// Seed for every actor's random stream
    #[serde(default)]
    pub seed: Option<u64>,

    /// Actor definitions
    pub actors: Vec<ActorConfig>,

    /// Remaining top-level keys, used as the last lookup fallback
    #[serde(flatten)]
    pub settings: BTreeMap<String, YamlValue>,
}

/// One actor definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActorConfig {
    /// Actor name, used in metric identities
    pub name: String,

    /// Actor type, resolved through the actor registry
    #[serde(rename = "Type")]
    pub actor_type: String,

    /// Number of independent instances of this actor
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Per-phase settings, in phase order
    #[serde(default)]
    pub phases: Vec<BTreeMap<String, YamlValue>>,

    /// Remaining actor-level keys
    #[serde(flatten)]
    pub settings: BTreeMap<String, YamlValue>,
}

fn default_threads() -> usize {
    1
}

impl WorkloadConfig {
    /// Load a workload from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a workload from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: WorkloadConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.actors.is_empty() {
            return Err(ConfigError::Invalid("workload defines no actors".to_string()));
        }
        for actor in &self.actors {
            if actor.threads == 0 {
                return Err(ConfigError::InvalidField {
                    scope: format!("Actor '{}'", actor.name),
                    field: "Threads".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Workload seed, or the default.
    pub fn seed(&self) -> u64 {
        self.seed.unwrap_or(DEFAULT_SEED)
    }

    /// Number of phases in the workload (the longest actor phase list).
    pub fn phase_count(&self) -> usize {
        self.actors.iter().map(|a| a.phases.len()).max().unwrap_or(0)
    }

    /// Lookup context for one actor.
    pub fn actor_context<'a>(&'a self, actor: &'a ActorConfig) -> ActorContext<'a> {
        ActorContext {
            workload: self,
            actor,
        }
    }
}

fn lookup<T: DeserializeOwned>(
    scope: &str,
    key: &str,
    value: Option<&YamlValue>,
) -> Result<Option<T>, ConfigError> {
    match value {
        None => Ok(None),
        Some(v) => serde_yaml::from_value(v.clone())
            .map(Some)
            .map_err(|e| ConfigError::InvalidField {
                scope: scope.to_string(),
                field: key.to_string(),
                message: e.to_string(),
            }),
    }
}

/// Actor-level lookups (actor keys, then workload keys).
#[derive(Debug, Clone, Copy)]
pub struct ActorContext<'a> {
    workload: &'a WorkloadConfig,
    actor: &'a ActorConfig,
}

impl<'a> ActorContext<'a> {
    pub fn name(&self) -> &'a str {
        &self.actor.name
    }

    pub fn actor_type(&self) -> &'a str {
        &self.actor.actor_type
    }

    pub fn threads(&self) -> usize {
        self.actor.threads
    }

    pub fn workload(&self) -> &'a WorkloadConfig {
        self.workload
    }

    fn scope(&self) -> String {
        format!("Actor '{}'", self.actor.name)
    }

    /// Raw value for a key, actor first then workload.
    pub fn raw(&self, key: &str) -> Option<&'a YamlValue> {
        self.actor
            .settings
            .get(key)
            .or_else(|| self.workload.settings.get(key))
    }

    /// Required value.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        self.get_optional(key)?
            .ok_or_else(|| ConfigError::MissingField {
                scope: self.scope(),
                field: key.to_string(),
            })
    }

    /// Optional value.
    pub fn get_optional<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        lookup(&self.scope(), key, self.raw(key))
    }

    /// Optional value with a default.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.get_optional(key)?.unwrap_or(default))
    }

    /// Phase contexts in order.
    pub fn phases(&self) -> impl Iterator<Item = PhaseContext<'a>> + 'a {
        let actor = *self;
        let config: &'a ActorConfig = self.actor;
        config
            .phases
            .iter()
            .enumerate()
            .map(move |(index, values)| PhaseContext {
                actor,
                index,
                values,
            })
    }
}

/// Phase-level lookups (phase keys, then actor, then workload).
#[derive(Debug, Clone, Copy)]
pub struct PhaseContext<'a> {
    actor: ActorContext<'a>,
    index: usize,
    values: &'a BTreeMap<String, YamlValue>,
}

impl<'a> PhaseContext<'a> {
    /// Zero-based phase number.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn actor(&self) -> ActorContext<'a> {
        self.actor
    }

    /// Human readable scope for error messages.
    pub fn scope(&self) -> String {
        format!("Actor '{}' phase {}", self.actor.name(), self.index)
    }

    /// Raw value for a key with fallback.
    pub fn raw(&self, key: &str) -> Option<&'a YamlValue> {
        self.values.get(key).or_else(|| self.actor.raw(key))
    }

    /// Raw value present on the phase itself (no fallback).
    pub fn raw_local(&self, key: &str) -> Option<&'a YamlValue> {
        self.values.get(key)
    }

    /// Required value.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        self.get_optional(key)?
            .ok_or_else(|| ConfigError::MissingField {
                scope: self.scope(),
                field: key.to_string(),
            })
    }

    /// Optional value.
    pub fn get_optional<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        lookup(&self.scope(), key, self.raw(key))
    }

    /// Optional value with a default.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.get_optional(key)?.unwrap_or(default))
    }

    /// Whether the phase is explicitly a no-op.
    pub fn is_nop(&self) -> Result<bool, ConfigError> {
        lookup(&self.scope(), "Nop", self.raw_local("Nop")).map(|v| v.unwrap_or(false))
    }
}

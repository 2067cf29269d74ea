//! Configuration for normcache-core
//!
//! Identity policy, root record names and optimistic-write limits. Loaded
//! from TOML or JSON; every section falls back to its defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::key::is_valid_typename;

pub const DEFAULT_QUERY_ROOT: &str = "ROOT_QUERY";
pub const DEFAULT_MUTATION_ROOT: &str = "ROOT_MUTATION";

/// Cache-wide configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How entity keys are derived from result objects
    pub identity: IdentityConfig,
    /// Names of the root records
    pub roots: RootConfig,
    /// Optimistic mutation settings
    pub optimistic: OptimisticConfig,
}

/// Identity policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Field carrying an object's type name
    pub typename_field: String,
    /// Default identifier field
    pub id_field: String,
    /// Per-type identifier field overrides, typename -> field
    pub key_fields: BTreeMap<String, String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            typename_field: "__typename".to_string(),
            id_field: "id".to_string(),
            key_fields: BTreeMap::new(),
        }
    }
}

/// Root record names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootConfig {
    pub query: String,
    pub mutation: String,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            query: DEFAULT_QUERY_ROOT.to_string(),
            mutation: DEFAULT_MUTATION_ROOT.to_string(),
        }
    }
}

/// Optimistic mutation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimisticConfig {
    /// Prefix of identifiers assigned to placeholders that carry none
    pub temp_id_prefix: String,
    /// Maximum number of mutations awaiting a result
    pub max_pending: usize,
}

impl Default for OptimisticConfig {
    fn default() -> Self {
        Self {
            temp_id_prefix: "temp-".to_string(),
            max_pending: 64,
        }
    }
}

impl CacheConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json_str)?)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load and validate a config file. `.json` files are parsed as JSON,
    /// anything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents)?,
            _ => Self::from_toml(&contents)?,
        };
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded cache config");
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.typename_field.is_empty() {
            return Err(ConfigError::MissingField("identity.typename_field".into()));
        }
        if self.identity.id_field.is_empty() {
            return Err(ConfigError::MissingField("identity.id_field".into()));
        }
        for (typename, field) in &self.identity.key_fields {
            if !is_valid_typename(typename) {
                return Err(ConfigError::InvalidName(typename.clone()));
            }
            if field.is_empty() {
                return Err(ConfigError::MissingField(format!(
                    "identity.key_fields.{typename}"
                )));
            }
        }

        // Root names share the key space with entity keys, so they must be
        // bare names without a separator.
        for root in [&self.roots.query, &self.roots.mutation] {
            if !is_valid_typename(root) {
                return Err(ConfigError::InvalidName(root.clone()));
            }
        }
        if self.roots.query == self.roots.mutation {
            return Err(ConfigError::InvalidName(format!(
                "query and mutation roots are both '{}'",
                self.roots.query
            )));
        }

        if self.optimistic.temp_id_prefix.is_empty() {
            return Err(ConfigError::MissingField("optimistic.temp_id_prefix".into()));
        }
        if self.optimistic.max_pending == 0 {
            return Err(ConfigError::OutOfRange(
                "optimistic.max_pending must be positive".into(),
            ));
        }

        Ok(())
    }
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Name is not usable as a typename or root name
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Value is out of valid range
    #[error("Value out of range: {0}")]
    OutOfRange(String),

    /// Required field is missing or empty
    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

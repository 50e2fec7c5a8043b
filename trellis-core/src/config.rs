//! Configuration
//!
//! Knobs that change how rendered trees are produced. Every field has a
//! default, so an empty JSON object is a valid configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid flow configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("repeat index attribute must not be empty")]
    EmptyAttribute,
}

/// Settings for rendering one template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlowConfig {
    /// Keep a mutation journal on rendered trees.
    pub record_mutations: bool,

    /// When set, repeated nodes also carry their index in this attribute.
    pub repeat_index_attribute: Option<String>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            record_mutations: true,
            repeat_index_attribute: None,
        }
    }
}

impl FlowConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        if config
            .repeat_index_attribute
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(ConfigError::EmptyAttribute);
        }
        Ok(config)
    }

    /// Set the repeat index attribute.
    pub fn with_repeat_index_attribute(mut self, name: impl Into<String>) -> Self {
        self.repeat_index_attribute = Some(name.into());
        self
    }

    /// Enable or disable the mutation journal.
    pub fn with_mutations(mut self, record: bool) -> Self {
        self.record_mutations = record;
        self
    }
}

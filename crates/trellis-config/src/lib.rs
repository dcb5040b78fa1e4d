//! Engine configuration for the trellis form engine.
//!
//! The main entry point is [`EngineConfig`], an immutable behavior object
//! handed to each engine instance at construction; nothing in the engine
//! reads ambient state. [`load_config`] layers an optional `trellis.toml`
//! under `TRELLIS_*` environment overrides for hosts that want file-driven
//! settings.

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or merged.
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    /// A configuration value was invalid.
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue {
        /// The configuration key that had an invalid value.
        key: String,
        /// Why the value is invalid.
        reason: String,
    },
}

/// A specialized `Result` type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// Engine configuration
// ---------------------------------------------------------------------------

/// Behavior switches for one form engine instance.
///
/// All fields use `serde` defaults so a partially-specified TOML file
/// deserializes with sensible values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Clear the stored values of a subtree the moment it turns irrelevant.
    /// When false, values persist until an explicit sweep or until
    /// serialization excludes them.
    #[serde(default = "default_true")]
    pub clear_irrelevant_immediately: bool,

    /// Re-validate a node whenever a dependency of its `required` or
    /// `constraint` binding changes, not just when the node itself is
    /// edited.
    #[serde(default)]
    pub validate_continuously: bool,

    /// When a dynamic repeat count reaches zero under a relevant group,
    /// report the empty container as disabled instead of leaving it
    /// untouched.
    #[serde(default = "default_true")]
    pub zero_count_disables_group: bool,

    /// Upper bound on propagation passes per external mutation. Hitting it
    /// means a runtime dependency cycle; the engine stops and records a
    /// diagnostic instead of spinning.
    #[serde(default = "default_max_passes")]
    pub max_propagation_passes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            clear_irrelevant_immediately: true,
            validate_continuously: false,
            zero_count_disables_group: true,
            max_propagation_passes: default_max_passes(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_passes() -> u32 {
    64
}

impl EngineConfig {
    /// Check value ranges. Called by [`load_config`]; direct constructors
    /// may call it too.
    pub fn validate(&self) -> Result<()> {
        if self.max_propagation_passes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_propagation_passes".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load configuration by layering, lowest priority first: built-in defaults,
/// the TOML file at `file` (skipped when `None` or missing), then `TRELLIS_*`
/// environment variables.
pub fn load_config(file: Option<&Path>) -> Result<EngineConfig> {
    let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));
    if let Some(file) = file {
        figment = figment.merge(Toml::file(file));
    }
    let config: EngineConfig = figment.merge(Env::prefixed("TRELLIS_")).extract()?;
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

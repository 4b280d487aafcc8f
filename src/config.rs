//! Engine configuration.
//!
//! Configuration is loaded with precedence: caller overrides > Env vars >
//! Config file > Defaults.
//!
//! # Example config file (templink.toml)
//! ```toml
//! max_chain_depth = 16
//! adopt_identical_locals = true
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default ceiling on template chain depth. Validation keeps the link
/// graph acyclic, so a traversal deeper than this means the store was
/// mutated behind the engine's back.
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 16;

/// Engine tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Recursion ceiling for template-of-template traversal; exceeding it
    /// converts a latent cycle into a hard error instead of looping
    pub max_chain_depth: usize,
    /// Whether a host-local object with identical content may be adopted
    /// (its `template_ref` grafted) instead of raising a name collision
    pub adopt_identical_locals: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
            adopt_identical_locals: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration with precedence: overrides > Env > File > Defaults
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `overrides` - Caller overrides to apply on top
    pub fn load(config_path: Option<&str>, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(EngineConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("TEMPLINK_"));
        figment = figment.merge(Serialized::defaults(overrides));

        figment.extract().map_err(ConfigError::from)
    }

    /// Load from environment and optional config file only (no overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }
}

/// Caller overrides that take precedence over file and env config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chain_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adopt_identical_locals: Option<bool>,
}

/// Configuration error
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

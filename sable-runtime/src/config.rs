//! Runtime configuration.
//!
//! Configuration can be set programmatically through the builder or loaded
//! from environment variables.
//!
//! # Environment Variables
//!
//! All variables use the `SABLE_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SABLE_STACK_SCAN` | Conservatively scan thread stacks during collection ("true"/"false") | true |
//! | `SABLE_ARENA_SHARDS` | Arena slots across all CPUs (even power of two, 2..=256) | 256 |

use std::env;
use std::sync::OnceLock;

use thiserror::Error;
use tracing::debug;

use crate::arena::MAX_ARENAS;

/// Configuration error.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A value failed validation.
    #[error("invalid configuration for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// What was wrong with it.
        message: String,
    },
    /// An environment variable could not be parsed.
    #[error("failed to parse environment variable '{var}': {message}")]
    EnvParse {
        /// Variable name.
        var: &'static str,
        /// What was wrong with it.
        message: String,
    },
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Whether `collect` scans thread stacks conservatively. Embedders with
    /// precise shadow stacks turn this off and rely on registered roots.
    pub stack_scan: bool,
    /// Number of arena slots CPU ids wrap into. Halving it on very wide
    /// machines trades contention for footprint.
    pub arena_shards: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_scan: true,
            arena_shards: MAX_ARENAS,
        }
    }
}

impl RuntimeConfig {
    /// Start building a configuration.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Load configuration from the environment, falling back to defaults
    /// for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::builder();

        if let Some(value) = read_env("SABLE_STACK_SCAN")? {
            builder = builder.stack_scan(parse_bool("SABLE_STACK_SCAN", &value)?);
        }
        if let Some(value) = read_env("SABLE_ARENA_SHARDS")? {
            let shards = value.parse::<usize>().map_err(|e| ConfigError::EnvParse {
                var: "SABLE_ARENA_SHARDS",
                message: e.to_string(),
            })?;
            builder = builder.arena_shards(shards);
        }

        builder.build()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let shards = self.arena_shards;
        if shards < 2 || shards > MAX_ARENAS || !shards.is_power_of_two() {
            return Err(ConfigError::InvalidValue {
                field: "arena_shards",
                message: format!("{shards} is not an even power of two in 2..={MAX_ARENAS}"),
            });
        }
        Ok(())
    }
}

/// Builder for [`RuntimeConfig`].
#[derive(Debug, Default, Clone)]
pub struct RuntimeConfigBuilder {
    stack_scan: Option<bool>,
    arena_shards: Option<usize>,
}

impl RuntimeConfigBuilder {
    /// Enable or disable conservative stack scanning.
    pub fn stack_scan(mut self, enabled: bool) -> Self {
        self.stack_scan = Some(enabled);
        self
    }

    /// Set the number of arena slots.
    pub fn arena_shards(mut self, shards: usize) -> Self {
        self.arena_shards = Some(shards);
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        let defaults = RuntimeConfig::default();
        let config = RuntimeConfig {
            stack_scan: self.stack_scan.unwrap_or(defaults.stack_scan),
            arena_shards: self.arena_shards.unwrap_or(defaults.arena_shards),
        };
        config.validate()?;
        Ok(config)
    }
}

fn read_env(var: &'static str) -> Result<Option<String>, ConfigError> {
    match env::var(var) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::EnvParse {
            var,
            message: e.to_string(),
        }),
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::EnvParse {
            var,
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

static RUNTIME_CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

/// Install the process-wide configuration. The first installation wins;
/// returns false if one was already present.
pub fn install(config: RuntimeConfig) -> bool {
    RUNTIME_CONFIG.set(config).is_ok()
}

/// The process-wide configuration, loading it from the environment on first
/// access. An invalid environment falls back to defaults.
pub fn get() -> &'static RuntimeConfig {
    RUNTIME_CONFIG.get_or_init(|| {
        let config = RuntimeConfig::from_env().unwrap_or_default();
        debug!(?config, "runtime configuration loaded");
        config
    })
}

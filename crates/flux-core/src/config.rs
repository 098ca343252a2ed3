//! Layered configuration
//!
//! Defaults, then an optional TOML file, then `FLUX_<SECTION>__<KEY>`
//! environment variables, then validation.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::predicates::SELF;

const ENV_PREFIX: &str = "FLUX_";

/// Core trait for Flux configuration types
pub trait LayeredConfig: Clone + Default + Send + Sync + 'static {
    /// Load configuration from a TOML file, filling gaps with defaults
    fn load_from_file(path: &Path) -> Result<Self, ConfigError>;

    /// Apply `FLUX_` environment overrides
    fn merge_with_env(&mut self) -> Result<(), ConfigError>;

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError>;

    /// Set a value by dotted key (e.g. `reconciler.auto_resync`)
    fn set_from_string(&mut self, key: &str, value: &str) -> Result<(), ConfigError>;
}

/// Subject repository settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Parent anchor used when a call does not name one
    pub default_source: String,
    /// Maximum concurrent property/entity resolutions per level
    pub resolve_concurrency: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            default_source: SELF.to_string(),
            resolve_concurrency: 8,
        }
    }
}

/// Event reconciler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Reactions needed for a message to count as popular
    pub popularity_threshold: usize,
    /// Emoji code point (hex) that counts towards popularity
    pub popularity_emoji: String,
    /// Reload the message set when a schema change arrives
    pub auto_resync: bool,
    /// Unhandled events retained for inspection
    pub unhandled_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            popularity_threshold: 3,
            popularity_emoji: "1f44d".to_string(),
            auto_resync: true,
            unhandled_capacity: 256,
        }
    }
}

/// Query settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Messages fetched per page
    pub page_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { page_limit: 50 }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluxConfig {
    /// `[repository]`
    pub repository: RepositoryConfig,
    /// `[reconciler]`
    pub reconciler: ReconcilerConfig,
    /// `[query]`
    pub query: QueryConfig,
}

impl FluxConfig {
    /// Parse TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(format!("{e}")))
    }

    /// Apply overrides from an explicit variable list.
    ///
    /// `FLUX_RECONCILER__AUTO_RESYNC=false` maps to `reconciler.auto_resync`.
    /// Variables without the prefix are ignored, as are prefixed variables
    /// that name no setting (`FLUX_HOME`). A bad value for a known setting
    /// is an error.
    pub fn merge_with_vars<I, K, V>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(rest) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let dotted = rest.to_lowercase().replace("__", ".");
            if !KEYS.contains(&dotted.as_str()) {
                tracing::warn!(variable = key.as_ref(), "ignoring unknown configuration variable");
                continue;
            }
            self.set_from_string(&dotted, value.as_ref())?;
        }
        Ok(())
    }
}

/// Every key [`LayeredConfig::set_from_string`] accepts.
const KEYS: &[&str] = &[
    "repository.default_source",
    "repository.resolve_concurrency",
    "reconciler.popularity_threshold",
    "reconciler.popularity_emoji",
    "reconciler.auto_resync",
    "reconciler.unhandled_capacity",
    "query.page_limit",
];

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::invalid(key, format!("{e}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::invalid(key, format!("{e}")))
}

impl LayeredConfig for FluxConfig {
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(format!("{e}")))?;
        Self::from_toml_str(&content)
    }

    fn merge_with_env(&mut self) -> Result<(), ConfigError> {
        self.merge_with_vars(std::env::vars())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.repository.default_source.trim().is_empty() {
            return Err(ConfigError::invalid(
                "repository.default_source",
                "must not be empty",
            ));
        }
        if self.repository.resolve_concurrency == 0 {
            return Err(ConfigError::invalid(
                "repository.resolve_concurrency",
                "must be greater than 0",
            ));
        }
        if self.reconciler.popularity_threshold == 0 {
            return Err(ConfigError::invalid(
                "reconciler.popularity_threshold",
                "must be greater than 0",
            ));
        }
        if u32::from_str_radix(&self.reconciler.popularity_emoji, 16)
            .ok()
            .and_then(char::from_u32)
            .is_none()
        {
            return Err(ConfigError::invalid(
                "reconciler.popularity_emoji",
                "must be a hex unicode code point",
            ));
        }
        if self.reconciler.unhandled_capacity == 0 {
            return Err(ConfigError::invalid(
                "reconciler.unhandled_capacity",
                "must be greater than 0",
            ));
        }
        if self.query.page_limit == 0 {
            return Err(ConfigError::invalid("query.page_limit", "must be greater than 0"));
        }
        Ok(())
    }

    fn set_from_string(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "repository.default_source" => self.repository.default_source = value.to_string(),
            "repository.resolve_concurrency" => {
                self.repository.resolve_concurrency = parse_usize(key, value)?;
            }
            "reconciler.popularity_threshold" => {
                self.reconciler.popularity_threshold = parse_usize(key, value)?;
            }
            "reconciler.popularity_emoji" => {
                self.reconciler.popularity_emoji = value.to_lowercase();
            }
            "reconciler.auto_resync" => self.reconciler.auto_resync = parse_bool(key, value)?,
            "reconciler.unhandled_capacity" => {
                self.reconciler.unhandled_capacity = parse_usize(key, value)?;
            }
            "query.page_limit" => self.query.page_limit = parse_usize(key, value)?,
            other => return Err(ConfigError::invalid(other, "unknown configuration key")),
        }
        Ok(())
    }
}

//! Engine configuration loading
//!
//! Bootstrap configuration is read once at startup and shared read-only by
//! every request afterwards.
//!
//! # Resolution Priority
//!
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`TRELLIS_CONFIG`)
//! 3. Platform config file (`<config_dir>/trellis/engine.toml`, then
//!    `/etc/trellis/engine.toml` on Unix)
//! 4. Built-in defaults (fallback, logged as a warning)
//!
//! A config file that exists but cannot be parsed is an error, never a
//! silent fallback to defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "TRELLIS_CONFIG";

/// Upper bound accepted for `binding.max_index`
pub const MAX_INDEX_LIMIT: usize = 1_000_000;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Data binding options
    #[serde(default)]
    pub binding: BindingConfig,

    /// Recovery pipeline defaults
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Logging configuration (consumed by binaries)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Data binding options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingConfig {
    /// Skip request parameters whose first path segment names no member of
    /// the handler instead of recording a failure for them.
    ///
    /// Default: true (forms routinely carry `submit`, `_method`, ...)
    #[serde(default = "default_ignore_unknown")]
    pub ignore_unknown_parameters: bool,

    /// Largest sequence index a path expression may grow a list to
    ///
    /// Default: 1024, at most [`MAX_INDEX_LIMIT`]
    #[serde(default = "default_max_index")]
    pub max_index: usize,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            ignore_unknown_parameters: default_ignore_unknown(),
            max_index: default_max_index(),
        }
    }
}

/// Recovery pipeline defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Recovery code used when no typed failure handler matches
    #[serde(default = "default_recovery_code")]
    pub default_code: String,

    /// Response status used when no typed failure handler matches
    #[serde(default = "default_recovery_status")]
    pub default_status: u16,

    /// Global results, consulted when the route config has no entry for a
    /// code (or no route was resolved at all). Replaces the built-in table
    /// when present.
    #[serde(default = "default_results")]
    pub results: HashMap<String, ResultConfig>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            default_code: default_recovery_code(),
            default_status: default_recovery_status(),
            results: default_results(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// What response generation does for a given outcome or recovery code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultConfig {
    /// Hand the named template to the renderer
    Render { template: String },
    /// Respond with 302 and a `Location` header, then stop the chain
    Redirect { location: String },
    /// Respond with a bare status code
    Status { code: u16 },
}

fn default_ignore_unknown() -> bool {
    true
}

fn default_max_index() -> usize {
    1024
}

fn default_recovery_code() -> String {
    "error".to_string()
}

fn default_recovery_status() -> u16 {
    500
}

fn default_results() -> HashMap<String, ResultConfig> {
    let mut results = HashMap::new();
    results.insert("error".to_string(), ResultConfig::Status { code: 500 });
    results.insert("not_found".to_string(), ResultConfig::Status { code: 404 });
    results.insert("forbidden".to_string(), ResultConfig::Status { code: 403 });
    results
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EngineConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded engine configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve and load configuration following the priority order above
    ///
    /// Missing configuration is not an error: defaults are used and a
    /// warning is logged.
    pub fn resolve(cli_arg: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_arg) {
            Some(path) => Self::load(&path),
            None => {
                warn!("No engine configuration file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.binding.max_index == 0 {
            return Err(Error::Config(
                "binding.max_index: must be at least 1".to_string(),
            ));
        }
        if self.binding.max_index > MAX_INDEX_LIMIT {
            return Err(Error::Config(format!(
                "binding.max_index: value {} exceeds {}",
                self.binding.max_index, MAX_INDEX_LIMIT
            )));
        }
        if self.recovery.default_code.trim().is_empty() {
            return Err(Error::Config(
                "recovery.default_code: must not be empty".to_string(),
            ));
        }
        if !(100..=599).contains(&self.recovery.default_status) {
            return Err(Error::Config(format!(
                "recovery.default_status: value {} out of range [100, 599]",
                self.recovery.default_status
            )));
        }
        for (code, result) in &self.recovery.results {
            if let ResultConfig::Status { code: status } = result {
                if !(100..=599).contains(status) {
                    return Err(Error::Config(format!(
                        "recovery.results.{}: status {} out of range [100, 599]",
                        code, status
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Locate the configuration file
///
/// Returns `None` when neither an explicit path nor a platform file exists.
/// Explicit paths (argument or environment) are returned even if missing so
/// that loading reports the I/O error instead of silently using defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config file
    let user_config = dirs::config_dir().map(|d| d.join("trellis").join("engine.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/trellis/engine.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    // Priority 4: Built-in defaults
    None
}
